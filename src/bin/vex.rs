//! Vex CLI - expression evaluation and document-template expansion

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use indexmap::IndexMap;
#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::io::{self, Read};
#[cfg(feature = "cli")]
use vellum::{
    parse_expression, stdlib, ExpandOptions, Expander, Name, Scope, SourceNode, SymbolTable, Value,
};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "vex")]
#[command(version)]
#[command(about = "Vellum - typed expression language and template expansion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single expression
    Eval {
        /// Expression source text
        expr: String,

        /// JSON file with name/value bindings
        #[arg(short, long)]
        bind: Option<String>,

        /// Print the result as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Expand a document template
    Expand {
        /// Template JSON file (reads from stdin if not provided)
        input: Option<String>,

        /// JSON file with name/value bindings
        #[arg(short, long)]
        bind: Option<String>,

        /// Keep nodes whose condition is false instead of dropping them
        #[arg(long)]
        no_prune: bool,

        /// Pretty print the output JSON
        #[arg(short, long)]
        pretty: bool,

        /// Exit with an error when the expansion report is not empty
        #[arg(long)]
        strict: bool,
    },
}

#[cfg(feature = "cli")]
fn main() -> io::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { expr, bind, json } => run_eval(&expr, bind.as_deref(), json),
        Commands::Expand {
            input,
            bind,
            no_prune,
            pretty,
            strict,
        } => run_expand(input.as_deref(), bind.as_deref(), no_prune, pretty, strict),
    }
}

/// Read a JSON object of name/value pairs into a runtime scope.
#[cfg(feature = "cli")]
fn load_bindings(path: &str) -> io::Result<Scope> {
    let text = fs::read_to_string(path)?;
    let values: IndexMap<String, Value> = serde_json::from_str(&text)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let mut scope = Scope::new();
    for (key, value) in values {
        match Name::new(key.as_str()) {
            Ok(name) => scope.bind_value(name, value),
            Err(err) => {
                eprintln!("invalid binding name `{}`: {}", key, err);
                std::process::exit(1);
            }
        }
    }
    Ok(scope)
}

#[cfg(feature = "cli")]
fn run_eval(source: &str, bind: Option<&str>, json: bool) -> io::Result<()> {
    let scope = match bind {
        Some(path) => load_bindings(path)?,
        None => Scope::new(),
    };
    let symbols = SymbolTable::compose(&[scope.symbols(), stdlib::symbols()]);

    let expr = match parse_expression(source, &symbols) {
        Ok(expr) => expr,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    match expr.evaluate(&scope) {
        Ok(value) => {
            if json {
                let serialized = serde_json::to_string(&value)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                println!("{}", serialized);
            } else {
                println!("{}", value);
            }
        }
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn run_expand(
    input: Option<&str>,
    bind: Option<&str>,
    no_prune: bool,
    pretty: bool,
    strict: bool,
) -> io::Result<()> {
    let text = match input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let source: SourceNode = serde_json::from_str(&text)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    let scope = match bind {
        Some(path) => load_bindings(path)?,
        None => Scope::new(),
    };
    let options = if no_prune {
        ExpandOptions::no_prune()
    } else {
        ExpandOptions::default()
    };

    let expansion = Expander::with_symbols(&scope.symbols()).expand(&source, &scope, &options);

    // The instance tree goes to stdout, the fault report to stderr.
    for err in &expansion.errors {
        eprintln!("{}", err);
    }

    let serialized = if pretty {
        serde_json::to_string_pretty(&expansion.root)
    } else {
        serde_json::to_string(&expansion.root)
    }
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    println!("{}", serialized);

    if strict && !expansion.errors.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Build with --features cli");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  cargo install vellum --features cli");
    eprintln!("  vex eval '1 + 2 * 3'");
    eprintln!("  vex expand template.json");
}
