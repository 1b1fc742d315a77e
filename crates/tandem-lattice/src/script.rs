//! The lattice engine's script language.
//!
//! One directive per line. Blank lines and `#` comments are skipped.
//!
//! | Directive | Effect |
//! |-----------|--------|
//! | `create_atoms N` | add `N` particles at random positions |
//! | `delete_atoms N` | remove the `N` most recently created particles |
//! | `clear` | remove every particle and reset the timestep |
//! | `timestep DT` | set the integration step |
//! | `run N` | advance `N` steps |
//! | `print TEXT` | write `TEXT` to the log |
//! | `error TEXT` | fail with `TEXT` |

use tandem_core::EngineError;

/// One parsed script line.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    /// Add particles.
    CreateAtoms(u64),
    /// Remove particles from the end.
    DeleteAtoms(u64),
    /// Remove all particles and reset the timestep.
    Clear,
    /// Set the integration step.
    Timestep(f32),
    /// Advance this many steps.
    Run(u64),
    /// Log a line.
    Print(String),
    /// Fail the script.
    Error(String),
}

/// Parse a whole script. Fails on the first bad line, before anything
/// runs.
pub fn parse(script: &str) -> Result<Vec<Directive>, EngineError> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<Directive, EngineError> {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "create_atoms" => count(line, rest).map(Directive::CreateAtoms),
        "delete_atoms" => count(line, rest).map(Directive::DeleteAtoms),
        "run" => count(line, rest).map(Directive::Run),
        "clear" => Ok(Directive::Clear),
        "timestep" => match rest.parse::<f32>() {
            Ok(dt) if dt.is_finite() && dt > 0.0 => Ok(Directive::Timestep(dt)),
            _ => Err(EngineError::new(format!(
                "ERROR: Illegal timestep command: {line}"
            ))),
        },
        "print" => Ok(Directive::Print(rest.to_owned())),
        "error" => Ok(Directive::Error(rest.to_owned())),
        _ => Err(EngineError::new(format!("ERROR: Unknown command: {line}"))),
    }
}

fn count(line: &str, arg: &str) -> Result<u64, EngineError> {
    arg.parse()
        .map_err(|_| EngineError::new(format!("ERROR: Expected integer in: {line}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_directive() {
        let script = "\
            # set up\n\
            create_atoms 10\n\
            delete_atoms 2\n\
            timestep 0.01\n\
            \n\
            run 5\n\
            print  hello   world\n\
            clear\n\
            error boom";
        assert_eq!(
            parse(script).unwrap(),
            vec![
                Directive::CreateAtoms(10),
                Directive::DeleteAtoms(2),
                Directive::Timestep(0.01),
                Directive::Run(5),
                Directive::Print("hello   world".into()),
                Directive::Clear,
                Directive::Error("boom".into()),
            ]
        );
    }

    #[test]
    fn unknown_command_message() {
        let err = parse("frobnicate").unwrap_err();
        assert_eq!(err.message, "ERROR: Unknown command: frobnicate");
    }

    #[test]
    fn bad_arguments_rejected() {
        assert!(parse("run many").is_err());
        assert!(parse("create_atoms -3").is_err());
        assert!(parse("timestep 0").is_err());
        assert!(parse("timestep nan").is_err());
    }

    #[test]
    fn bad_line_rejects_whole_script() {
        assert!(parse("create_atoms 5\nbogus\nrun 1").is_err());
    }

    #[test]
    fn empty_script_is_fine() {
        assert_eq!(parse("").unwrap(), vec![]);
        assert_eq!(parse("# nothing\n\n").unwrap(), vec![]);
    }
}
