use clap::{Parser as ClapParser, ValueEnum};
use std::{
    collections::HashMap,
    fmt::Debug,
    fs,
    io::{self, Write},
    process,
};

use log::{LevelFilter, info};
use tether::{ArgSpec, CompileContext, Decode, DecodeError, Mrb, ScriptException, ToValue, Value, decode};

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Run Ruby scripts with host bindings", long_about = None)]
struct Cli {
    /// Script to run
    #[arg(required = false, help = "The .rb file to execute")]
    file: Option<String>,

    /// Code to run instead of a file
    #[arg(short = 'e', long = "eval", help = "Execute CODE")]
    code: Option<String>,

    /// Decode the result into a host type instead of printing `inspect`
    #[arg(long, value_enum)]
    decode: Option<DecodeKind>,

    /// Start a REPL after running the inputs (default without inputs)
    #[arg(long)]
    repl: bool,

    /// Log more (-v debug, -vv trace). RUST_LOG overrides this.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments visible to the script as `Host.argv`
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DecodeKind {
    Bool,
    Int,
    Float,
    String,
    Strings,
    Map,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mrb = Mrb::open();
    install_host(&mrb, cli.args.clone());

    let mut inputs = Vec::new();
    if let Some(filename) = &cli.file {
        match fs::read_to_string(filename) {
            Ok(source) => inputs.push((source, CompileContext::new().with_filename(filename.as_str()))),
            Err(err) => {
                eprintln!("Error reading file '{}': {}", filename, err);
                process::exit(1);
            }
        }
    }
    if let Some(code) = &cli.code {
        inputs.push((code.clone(), CompileContext::new().with_filename("-e")));
    }

    for (source, context) in &inputs {
        match mrb.evaluate_with(source, context) {
            Ok(value) => print_result(value, cli.decode),
            Err(exc) => {
                report(&exc);
                process::exit(1);
            }
        }
    }

    if cli.repl || inputs.is_empty() {
        run_repl(&mrb, cli.decode);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// The `Host` module: what the script may ask of this process.
fn install_host(mrb: &Mrb, argv: Vec<String>) {
    let host = match mrb.define_module("Host") {
        Ok(host) => host,
        Err(exc) => {
            report(&exc);
            process::exit(1);
        }
    };
    host.define_class_method("argv", ArgSpec::NONE, move |mrb, _, _| Ok(Some(argv.to_value(mrb))));
    host.define_class_method("env", ArgSpec::req(1), |mrb, _, args| {
        let name = args.get(0).to_s();
        Ok(Some(std::env::var(&name).ok().to_value(mrb)))
    });
    host.define_class_method("log", ArgSpec::req(1), |_, _, args| {
        info!(target: "script", "{}", args.get(0).to_s());
        Ok(None)
    });
}

fn render(value: Value<'_>, kind: Option<DecodeKind>) -> Result<String, DecodeError> {
    match kind {
        None => Ok(value.inspect()),
        Some(DecodeKind::Bool) => decoded::<bool>(value),
        Some(DecodeKind::Int) => decoded::<i64>(value),
        Some(DecodeKind::Float) => decoded::<f64>(value),
        Some(DecodeKind::String) => decoded::<String>(value),
        Some(DecodeKind::Strings) => decoded::<Vec<String>>(value),
        Some(DecodeKind::Map) => decoded::<HashMap<String, String>>(value),
    }
}

fn print_result(value: Value<'_>, kind: Option<DecodeKind>) {
    match render(value, kind) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("Error decoding result: {err}");
            process::exit(1);
        }
    }
}

fn decoded<T: Decode + Clone + Default + Debug>(value: Value<'_>) -> Result<String, DecodeError> {
    let mut out = T::default();
    decode(&mut out, &value)?;
    Ok(format!("{out:?}"))
}

fn report(exc: &ScriptException<'_>) {
    eprintln!("{}: {}", exc.class_name(), exc.message());
}

fn run_repl(mrb: &Mrb, kind: Option<DecodeKind>) {
    println!("tether REPL");
    println!("Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input_buffer = String::new();
    let context = CompileContext::new().with_filename("(repl)");

    loop {
        print!("> ");
        if let Err(err) = stdout.flush() {
            eprintln!("Error flushing stdout: {}", err);
            break;
        }

        input_buffer.clear();
        match stdin.read_line(&mut input_buffer) {
            Ok(0) => break,
            Ok(_) => {
                let input = input_buffer.trim();
                if input == "exit" {
                    break;
                }
                if input.is_empty() {
                    continue;
                }

                let checkpoint = mrb.arena_save();
                match mrb.evaluate_with(input, &context) {
                    Ok(value) => match render(value, kind) {
                        Ok(text) => println!("{text}"),
                        Err(err) => eprintln!("Error: {err}"),
                    },
                    Err(exc) => report(&exc),
                }
                mrb.arena_restore(checkpoint);
            }
            Err(err) => {
                eprintln!("Error reading input: {}", err);
                break;
            }
        }
    }
}
