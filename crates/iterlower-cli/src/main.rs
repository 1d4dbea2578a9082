use std::{env, fs, process::ExitCode, time::Instant};

use iterlower::ast::Stmt;
use iterlower::host::test_support::TestHost;
use iterlower::trace::StderrTracer;
use iterlower::transform_closure_iterator;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "example.json" };
    let body = match read_body(file_path) {
        Ok(body) => body,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut host = TestHost::without_env(false, "()");
    let mut tracer = StderrTracer;

    let start = Instant::now();
    let lowered = transform_closure_iterator(&mut host, &mut tracer, body);
    let elapsed = start.elapsed();

    match lowered {
        Ok(stmts) => {
            match serde_json::to_string_pretty(&stmts) {
                Ok(json) => println!("{json}"),
                Err(err) => {
                    eprintln!("error: failed to serialize lowered body: {err}");
                    return ExitCode::FAILURE;
                }
            }
            eprintln!("success after: {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

/// Reads `file_path` as a JSON-encoded `Vec<Stmt>` — the body of the iterator
/// to lower. There is no source-language parser in scope, so this harness
/// takes the AST directly rather than text.
fn read_body(file_path: &str) -> Result<Vec<Stmt>, String> {
    eprintln!("Reading file: {file_path}");
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("Error: {file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("Error reading {file_path}: {err}"));
        }
    }
    let contents = match fs::read_to_string(file_path) {
        Ok(contents) => contents,
        Err(err) => return Err(format!("Error reading file: {err}")),
    };
    serde_json::from_str(&contents).map_err(|err| format!("Error parsing {file_path}: {err}"))
}
