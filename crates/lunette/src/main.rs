use std::io::{IsTerminal, Read};
use std::process::ExitCode;

use lunette::{LuaError, LuaVersion, Script, ScriptOptions, Value};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const PROGRAM: &str = "lunette";

/// Why a command-line run stopped.
#[derive(Debug, Error)]
enum CliError {
    #[error("'{0}' needs argument")]
    MissingValue(String),
    #[error("unrecognized option '{0}'")]
    UnknownOption(String),
    #[error("'-l' and '-o' need a script")]
    NeedsScript,
    #[error("unsupported Lua version '{0}'")]
    UnsupportedVersion(String),
    #[error("cannot read stdin: {0}")]
    Stdin(#[source] std::io::Error),
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: std::io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("cannot list a host function")]
    HostFunction,
    #[error("{}", describe_error(.0))]
    Script(#[from] LuaError),
}

impl CliError {
    /// Errors in the command line itself, which also print the usage text.
    fn is_usage(&self) -> bool {
        matches!(
            self,
            CliError::MissingValue(_)
                | CliError::UnknownOption(_)
                | CliError::NeedsScript
                | CliError::UnsupportedVersion(_)
        )
    }
}

/// What the command line asked for.
#[derive(Default)]
struct Args {
    script_file: Option<String>,
    script_args: Vec<String>,
    exec_statements: Vec<String>,
    interactive: bool,
    show_version: bool,
    list: bool,
    output: Option<String>,
    strip: bool,
    version: LuaVersion,
}

fn main() -> ExitCode {
    init_logging();
    match parse_args(std::env::args().skip(1).collect()).and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{PROGRAM}: {e}");
            if e.is_usage() {
                print_usage();
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LUNETTE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_usage() {
    eprintln!(
        "usage: {PROGRAM} [options] [script [args]]\n\
         Available options are:\n\
         \x20 -e stat   execute string 'stat'\n\
         \x20 -i        enter interactive mode after executing 'script'\n\
         \x20 -l        list the bytecode of 'script' instead of running it\n\
         \x20 -o file   write 'script' as a binary chunk to 'file'\n\
         \x20 -s        strip debug information from the binary chunk\n\
         \x20 -V ver    accept Lua 'ver' (5.2, 5.3 or 5.4)\n\
         \x20 -v        show version information\n\
         \x20 --        stop handling options\n\
         \x20 -         execute stdin and stop handling options"
    );
}

fn parse_args(args: Vec<String>) -> Result<Args, CliError> {
    let mut out = Args::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--" => {
                if let Some(file) = args.get(i + 1) {
                    out.script_file = Some(file.clone());
                    out.script_args = args[i + 2..].to_vec();
                }
                break;
            }
            "-v" => out.show_version = true,
            "-i" => out.interactive = true,
            "-l" => out.list = true,
            "-s" => out.strip = true,
            "-e" | "-o" | "-V" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(CliError::MissingValue(arg.to_string()));
                };
                apply_valued(&mut out, &arg[..2], value)?;
                i += 1;
            }
            _ if arg.len() > 2 && matches!(arg.get(..2), Some("-e" | "-o" | "-V")) => {
                apply_valued(&mut out, &arg[..2], &arg[2..])?;
            }
            _ if arg.starts_with('-') && arg != "-" => {
                return Err(CliError::UnknownOption(arg.to_string()));
            }
            _ => {
                // Everything after the script name belongs to the script.
                out.script_file = Some(arg.to_string());
                out.script_args = args[i + 1..].to_vec();
                break;
            }
        }
        i += 1;
    }
    if (out.list || out.output.is_some()) && out.script_file.is_none() {
        return Err(CliError::NeedsScript);
    }
    Ok(out)
}

fn apply_valued(out: &mut Args, flag: &str, value: &str) -> Result<(), CliError> {
    match flag {
        "-e" => out.exec_statements.push(value.to_string()),
        "-o" => out.output = Some(value.to_string()),
        _ => {
            out.version =
                LuaVersion::parse(value).ok_or_else(|| CliError::UnsupportedVersion(value.to_string()))?;
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    if args.show_version {
        println!("{}", banner(args.version));
    }
    let mut script = Script::with_options(ScriptOptions::default().with_version(args.version));

    if let Some(path) = &args.script_file {
        if args.list || args.output.is_some() {
            return compile_only(&mut script, path, &args);
        }
    }
    set_arg_table(&mut script, &args);

    for stat in &args.exec_statements {
        script.do_string(stat, "=(command line)")?;
    }

    let stdin_is_tty = std::io::stdin().is_terminal();
    match &args.script_file {
        Some(path) => {
            let (source, chunk_name) = read_script(path)?;
            let f = script.load(lunette::strip_shebang(&source), &chunk_name)?;
            let call_args: Vec<Value> = args.script_args.iter().map(|a| script.string(a)).collect();
            script.call(f, &call_args)?;
        }
        None if !stdin_is_tty && args.exec_statements.is_empty() && !args.interactive => {
            let (source, chunk_name) = read_script("-")?;
            let f = script.load(&source, &chunk_name)?;
            script.call(f, &[])?;
        }
        None => {}
    }

    let nothing_else = args.script_file.is_none() && args.exec_statements.is_empty();
    if args.interactive || (nothing_else && stdin_is_tty && !args.show_version) {
        if !args.show_version {
            println!("{}", banner(args.version));
        }
        run_repl(&mut script);
    }
    Ok(())
}

fn banner(version: LuaVersion) -> String {
    format!("Lunette {} -- {version} compatible", env!("CARGO_PKG_VERSION"))
}

fn read_script(path: &str) -> Result<(Vec<u8>, String), CliError> {
    if path == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(CliError::Stdin)?;
        return Ok((buf, "=stdin".to_string()));
    }
    let source = std::fs::read(path).map_err(|source| CliError::Open {
        path: path.to_string(),
        source,
    })?;
    Ok((source, format!("@{path}")))
}

/// `-l` and `-o`: compile without running.
fn compile_only(script: &mut Script, path: &str, args: &Args) -> Result<(), CliError> {
    let (source, chunk_name) = read_script(path)?;
    let f = script.load(lunette::strip_shebang(&source), &chunk_name)?;
    if args.list {
        let Value::Function(idx) = f else {
            return Err(CliError::HostFunction);
        };
        let vm = script.vm();
        let proto = vm.proto_tree(vm.gc.get_closure(idx).proto_idx);
        print!("{}", lunette_compiler::disasm::disassemble(&proto, &vm.strings));
    }
    if let Some(output) = &args.output {
        let bytes = script.dump(f, args.strip)?;
        std::fs::write(output, bytes).map_err(|source| CliError::Write {
            path: output.clone(),
            source,
        })?;
        tracing::info!(output = %output, "binary chunk written");
    }
    Ok(())
}

/// Global `arg`: script at 0, its arguments from 1, the program at -1.
fn set_arg_table(script: &mut Script, args: &Args) {
    let table = script.vm_mut().new_table();
    let mut entries = vec![(-1, PROGRAM.to_string())];
    if let Some(path) = &args.script_file {
        entries.push((0, path.clone()));
    }
    entries.extend(args.script_args.iter().enumerate().map(|(j, a)| (j as i64 + 1, a.clone())));
    for (index, text) in entries {
        let value = script.string(&text);
        script.vm_mut().gc.get_table_mut(table).raw_seti(index, value);
    }
    script.set_global("arg", Value::Table(table));
}

fn describe_error(e: &LuaError) -> String {
    match e.traceback() {
        Some(tb) => format!("{e}\n{tb}"),
        None => e.to_string(),
    }
}

fn is_incomplete(e: &LuaError) -> bool {
    matches!(e, LuaError::Syntax(s) if s.premature_end)
}

// ---- REPL ----

fn run_repl(script: &mut Script) {
    let config = rustyline::config::Config::builder()
        .auto_add_history(true)
        .build();
    let mut rl = match rustyline::DefaultEditor::with_config(config) {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{PROGRAM}: cannot initialize REPL: {e}");
            return;
        }
    };

    loop {
        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{PROGRAM}: readline error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        // An expression line prints its values.
        let f = match script.load(format!("return {line}").as_bytes(), "=stdin") {
            Ok(f) => Ok(f),
            Err(_) => load_statement(script, &mut rl, line),
        };
        match f.and_then(|f| script.call(f, &[])) {
            Ok(values) => print_values(script, &values),
            Err(e) => eprintln!("{}", describe_error(&e)),
        }
    }
}

/// Load `line` as a statement, reading continuation lines while the input
/// is merely unfinished.
fn load_statement(
    script: &mut Script,
    rl: &mut rustyline::DefaultEditor,
    mut source: String,
) -> Result<Value, LuaError> {
    loop {
        match script.load(source.as_bytes(), "=stdin") {
            Err(e) if is_incomplete(&e) => match rl.readline(">> ") {
                Ok(more) => {
                    source.push('\n');
                    source.push_str(&more);
                }
                Err(_) => return Err(e),
            },
            other => return other,
        }
    }
}

fn print_values(script: &mut Script, values: &[Value]) {
    if values.is_empty() {
        return;
    }
    let parts: Result<Vec<String>, LuaError> = values.iter().map(|&v| script.to_display_string(v)).collect();
    match parts {
        Ok(parts) => println!("{}", parts.join("\t")),
        Err(e) => eprintln!("{}", describe_error(&e)),
    }
}
