//! Minimal CLI glue for the §6 external interface: `sabyc <input> [-o
//! <output>]`. Lexing and parsing are out of scope for this crate (there is
//! no tokenizer/parser here to turn `<input>`'s text into an `ast::Ast`
//! tree), so this binary resolves and validates the paths §6 specifies,
//! reports that honestly, and exits. It exists so the crate is runnable
//! end to end at the layer it actually implements, not as a stand-in parser.

use sabyc::analyzer::CompilerPaths;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

struct Args {
    input: PathBuf,
    output: Option<PathBuf>,
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Args, String> {
    argv.next(); // argv[0]
    let mut input = None;
    let mut output = None;
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-o" => {
                let path = argv.next().ok_or("-o requires an output path")?;
                output = Some(PathBuf::from(path));
            }
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }
    let input = input.ok_or("usage: sabyc <input> [-o <output>]")?;
    Ok(Args { input, output })
}

/// `lib_path` is the directory named `lib/` beside the running binary,
/// normalised absolute; `sym_path` is the input's absolute path with its
/// extension replaced by `.sym` (§6).
fn resolve_paths(input: &std::path::Path) -> std::io::Result<CompilerPaths> {
    let exe = env::current_exe()?;
    let lib_path = exe
        .parent()
        .map(|dir| dir.join("lib"))
        .unwrap_or_else(|| PathBuf::from("lib"))
        .canonicalize()
        .unwrap_or_else(|_| exe.parent().map(|d| d.join("lib")).unwrap_or_else(|| PathBuf::from("lib")));
    let sym_path = input.canonicalize().unwrap_or_else(|_| input.to_path_buf()).with_extension("sym");
    Ok(CompilerPaths { lib_path, sym_path })
}

fn main() -> ExitCode {
    let args = match parse_args(env::args()) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(1);
        }
    };

    let paths = match resolve_paths(&args.input) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: cannot resolve paths for '{}': {e}", args.input.display());
            return ExitCode::from(1);
        }
    };

    eprintln!("sabyc: lib_path = {}", paths.lib_path.display());
    eprintln!("sabyc: sym_path = {}", paths.sym_path.display());
    if let Some(out) = &args.output {
        eprintln!("sabyc: output = {}", out.display());
    }
    eprintln!(
        "sabyc: no lexer/parser is included in this crate; pass an `ast::Ast` tree to \
         `sabyc::compiler::Compiler::compile` programmatically to analyze and build SSA for '{}'",
        args.input.display()
    );
    ExitCode::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_an_input_path() {
        let argv = vec!["sabyc".to_string()];
        assert!(parse_args(argv.into_iter()).is_err());
    }

    #[test]
    fn accepts_input_and_output_flag() {
        let argv = vec!["sabyc".to_string(), "mod.saby".to_string(), "-o".to_string(), "mod.out".to_string()];
        let args = parse_args(argv.into_iter()).unwrap();
        assert_eq!(args.input, PathBuf::from("mod.saby"));
        assert_eq!(args.output, Some(PathBuf::from("mod.out")));
    }

    #[test]
    fn dash_o_without_a_value_is_an_error() {
        let argv = vec!["sabyc".to_string(), "mod.saby".to_string(), "-o".to_string()];
        assert!(parse_args(argv.into_iter()).is_err());
    }
}
