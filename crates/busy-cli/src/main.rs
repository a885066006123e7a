use std::env;
use std::io;
use std::process::ExitCode;

use busy::{LoggingBackend, ProcessHost, Session};

const USAGE: &str = "usage: busy [options] [source_dir [build_dir]]
  -P key=value   set a build parameter (dotted names reach submodules)
  -t designator  add a product to build (default: the '!' products)
  -h, --help     show this help

Parses the BUSY description below source_dir (default '..'), selects the
requested products and prints the resulting build-operation stream.
Artifacts are rooted at build_dir (default './output').";

struct Args {
    source_dir: String,
    build_dir: String,
    params: Vec<(String, String)>,
    products: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        source_dir: "..".to_string(),
        build_dir: "./output".to_string(),
        params: Vec::new(),
        products: Vec::new(),
    };
    let mut positional = 0usize;
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(USAGE.to_string()),
            "-P" => {
                let Some(binding) = iter.next() else {
                    return Err("-P requires key=value".to_string());
                };
                let Some((key, value)) = binding.split_once('=') else {
                    return Err(format!("invalid parameter binding: {binding}"));
                };
                args.params.push((key.to_string(), value.to_string()));
            }
            "-t" => {
                let Some(product) = iter.next() else {
                    return Err("-t requires a product designator".to_string());
                };
                args.products.push(product);
            }
            _ if arg.starts_with('-') => return Err(format!("unknown option: {arg}\n\n{USAGE}")),
            _ => {
                match positional {
                    0 => args.source_dir = arg,
                    1 => args.build_dir = arg,
                    _ => return Err(format!("unexpected argument: {arg}")),
                }
                positional += 1;
            }
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let mut session = Session::new();
    session.host = Box::new(ProcessHost);
    for (key, value) in &args.params {
        session.set_param(key, value);
    }

    if let Err(err) = session.load(&args.source_dir, &args.build_dir) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let selection = if args.products.is_empty() { None } else { Some(args.products.as_slice()) };
    let products = match session.select(selection) {
        Ok(products) => products,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut backend = LoggingBackend::new(io::stdout().lock());
    if let Err(err) = session.visit(&products, &mut backend) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
