// Command line parsing.
//
// Tokens are scanned left to right. A recognized flag takes the next token
// as its value and both slots are blanked. Whatever is left is either an
// error (configure, upload, list) or the list of files (infer).

use crate::config::Settings;
use crate::error::{ClassinetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Help,
    Configure,
    Upload,
    List,
    Infer,
}

type FlagTable = Vec<(&'static str, &'static [&'static str])>;

const CONTEXT_FLAGS: [(&str, &[&str]); 3] = [
    ("user_token", &["--user_token", "-u"]),
    ("instance_description", &["--instance_description", "-i"]),
    ("debug", &["--debug", "-g"]),
];

impl Action {
    pub fn from_arg(arg: &str) -> Option<Action> {
        match arg {
            "-h" | "--help" | "help" => Some(Action::Help),
            "-c" | "--configure" | "configure" | "conf" | "config" => Some(Action::Configure),
            "-u" | "--upload" | "upload" => Some(Action::Upload),
            "-l" | "--list" | "list" => Some(Action::List),
            "-i" | "--infer" | "infer" => Some(Action::Infer),
            _ => None,
        }
    }

    /// Flags accepted by this action, keyed by the setting they fill.
    pub fn flags(self) -> FlagTable {
        let mut table: FlagTable = CONTEXT_FLAGS.to_vec();
        match self {
            Action::Help | Action::Configure => {}
            Action::Upload => {
                table.push(("metadata", &["--metadata", "-d"]));
                table.push(("model", &["--model", "-m"]));
            }
            Action::List => table.push(("model", &["--model", "-m"])),
            Action::Infer => {
                table.push(("model", &["--model", "-m"]));
                table.push(("txt", &["--txt", "-t"]));
                table.push(("marked", &["--marked", "-k"]));
            }
        }
        table
    }

    /// Parameters that must be given on the command line.
    pub fn required(self) -> &'static [&'static str] {
        match self {
            Action::Upload => &["metadata", "model"],
            Action::Infer => &["model"],
            Action::Help | Action::Configure | Action::List => &[],
        }
    }

    /// Whether leftover tokens are files rather than mistakes.
    fn takes_files(self) -> bool {
        self == Action::Infer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub action: Action,
    /// Only the flags that were given.
    pub parsed: Settings,
    /// File patterns, for `infer`.
    pub files: Vec<String>,
}

/// Parse arguments, program name excluded.
pub fn parse<I, S>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args: Vec<String> = args.into_iter().map(Into::into).collect();
    let first = match args.first() {
        Some(first) => first.clone(),
        None => return Err(ClassinetError::usage("No action specified.")),
    };
    let action = Action::from_arg(&first)
        .ok_or_else(|| ClassinetError::usage(format!("Unknown action {}.", first)))?;
    if action == Action::Help {
        // Help ignores whatever follows it.
        return Ok(Invocation {
            action,
            parsed: Settings::new(),
            files: Vec::new(),
        });
    }
    args[0].clear();
    // A flag in last position reads this empty slot as its value.
    args.push(String::new());

    let table = action.flags();
    let mut parsed = Settings::new();
    for i in 1..args.len() - 1 {
        let token = args[i].as_str();
        if let Some((key, _)) = table.iter().find(|(_, names)| names.iter().any(|n| *n == token)) {
            parsed.insert(key.to_string(), std::mem::take(&mut args[i + 1]));
            args[i].clear();
        }
    }

    let leftovers: Vec<String> = args.into_iter().filter(|a| !a.is_empty()).collect();
    if !action.takes_files() && !leftovers.is_empty() {
        let lines: Vec<String> = leftovers
            .iter()
            .map(|a| format!("Misplaced parameter {}", a))
            .collect();
        return Err(ClassinetError::usage(lines.join("\n")));
    }

    let missing: Vec<String> = action
        .required()
        .iter()
        .filter(|key| parsed.get(**key).map_or(true, String::is_empty))
        .map(|key| format!("Missing required parameter: {}", key))
        .collect();
    if !missing.is_empty() {
        return Err(ClassinetError::usage(missing.join("\n")));
    }

    Ok(Invocation {
        action,
        parsed,
        files: leftovers,
    })
}
