use std::fs;
use std::process::ExitCode;

use escomp::emit::{emit_target_source, print_module};
use escomp::unicode_stream::UnicodeStream;
use escomp::{analyze, ir_builder, optimizer, CompileError, CompileResult, Parser};

struct Args {
    inputs: Vec<String>,
    output: String,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut inputs = Vec::new();
    let mut output = "a.cc".to_owned();
    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        if arg == "-o" {
            output = iter.next().ok_or_else(|| "-o requires a path".to_owned())?.clone();
        } else {
            inputs.push(arg.clone());
        }
    }
    if inputs.is_empty() {
        return Err("no input files".to_owned());
    }
    Ok(Args { inputs, output })
}

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("escompc: {message}");
            return ExitCode::FAILURE;
        }
    };

    for path in &args.inputs {
        if let Err(err) = compile_file(path, &args.output) {
            eprintln!("in: {path}: {err}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn compile_file(path: &str, output: &str) -> CompileResult<()> {
    let bytes = fs::read(path).map_err(|e| CompileError::Io { path: path.to_owned(), message: e.to_string() })?;
    let source = decode_source(&bytes);

    let program = Parser::parse_program(&source)?;
    let mut analysis = analyze(&program);
    let mut module = ir_builder::build(&program, &mut analysis);
    optimizer::run(&mut module);
    escomp::emit::finalize(&mut module);

    let ir_text = print_module(&module);
    let source_out = emit_target_source(&module);
    let mut target_text = source_out.declarations;
    target_text.push_str(&source_out.definitions);

    fs::write(output, target_text).map_err(|e| CompileError::Io { path: output.to_owned(), message: e.to_string() })?;
    let ir_path = format!("{output}.ir");
    fs::write(&ir_path, ir_text).map_err(|e| CompileError::Io { path: ir_path, message: e.to_string() })?;
    Ok(())
}

/// Normalizes UTF-8/UTF-16LE/UTF-16BE (with or without BOM) source bytes
/// into a single `String` the parser can consume; `UnicodeStream` already
/// does the encoding sniffing, this just drains it back into text.
fn decode_source(bytes: &[u8]) -> String {
    let mut stream = UnicodeStream::new(bytes);
    let mut text = String::with_capacity(bytes.len());
    loop {
        let point = stream.next();
        if point == escomp::unicode_stream::END_OF_INPUT {
            break;
        }
        text.push(char::from_u32(point).unwrap_or('\u{FFFD}'));
    }
    text
}
