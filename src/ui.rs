// UI layer: one flow per action. `App::run` parses the command line,
// fills defaults from the configuration store and hands over to the flow.
// Flows print results to the supplied sink and return errors for the caller
// to report; they never exit the process themselves.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use crate::api::{Client, InferenceService, Model};
use crate::batch::{BatchSummary, BatchTracker, Sink};
use crate::cli::{self, Action};
use crate::config::{ConfigStore, SaveOutcome, Settings};
use crate::error::{ClassinetError, Result};
use crate::hints::{ApiMode, DebugHints};
use crate::metadata::ModelMetadata;

const HELP: &str = r#"Classinet client command line application.
Version $version$

Usage:
classinet -h|--help|help
classinet -c|--configure|configure [(--user_token|-u) token] [(--instance_description|-i) description] [(--debug|-g) debug_options]
classinet -l|--list|list [(--model|-m) model_id] [CONTEXT]
classinet -u|--upload|upload (--metadata|-d) metadata_filename (--model|-m) model_filename [CONTEXT]
classinet -i|--infer|infer (--model|-m) model_id [CONTEXT] [(--txt|-t) output_txt_directory] [(--marked|-k) output_marked_images_path] images images ...

help:
Print this help text.

configure:
Stores the parameter values obscured in $config_file$. Other commands use them as defaults.
user_token identifies the classinet user the resources are billed to. Keep it private.
instance_description optionally names this installation in billing reports and logs.
debug_options is a list of hints such as "api=sync,stats=yes".
The value "clear" deletes an option, e.g. "--user_token clear" removes the stored token.
Without any option, and on a terminal, configure asks for the values.

list:
List the models available to this user with their metadata, or only the model given with --model.

upload:
Register a model with the classinet service. The metadata file holds fields such as
"name: yolo; input_width: 416; input_height: 416; class_ids: 0=person,1=car; description: ...".

infer:
Run the model on every image listed at the end of the command line. Wildcards (quoted or not) and directories
are supported; directories are searched recursively.
One line per image is written to stdout.
With --txt the inference of each image is also written to <directory>/<image name>.txt.

[CONTEXT] stands for the options of the configure command. Given on the command line they
override the stored defaults. A user_token must be resolved one way or the other.
"#;

pub struct App {
    store: ConfigStore,
    service: Arc<dyn InferenceService>,
    interactive: bool,
}

impl App {
    pub fn new(store: ConfigStore, service: Arc<dyn InferenceService>) -> Self {
        App {
            store,
            service,
            interactive: false,
        }
    }

    /// Allow prompting on the terminal.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn help_text(&self) -> String {
        HELP.replace("$version$", Client::version())
            .replace("$config_file$", &self.store.path().display().to_string())
    }

    /// Run one command line, program name excluded.
    pub fn run<I, S>(&self, args: I, mut out: Sink) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(ClassinetError::usage(format!(
                "No action specified.\n\n{}",
                self.help_text()
            )));
        }

        let invocation = cli::parse(args)?;
        log::debug!("Running {:?}", invocation.action);
        let mut arguments = invocation.parsed;
        match invocation.action {
            Action::Help => {
                out.write_all(self.help_text().as_bytes())?;
                Ok(())
            }
            Action::Configure => self.configure(arguments, &mut out),
            Action::List => {
                self.resolve_context(&mut arguments)?;
                self.list(&arguments, &mut out)
            }
            Action::Upload => {
                self.resolve_context(&mut arguments)?;
                self.upload(&arguments, &mut out)
            }
            Action::Infer => {
                self.resolve_context(&mut arguments)?;
                self.infer(&arguments, &invocation.files, out)
            }
        }
    }

    fn resolve_context(&self, arguments: &mut Settings) -> Result<()> {
        self.store.fill_defaults(arguments);
        if value(arguments, "user_token").is_empty() {
            return Err(ClassinetError::usage(
                "Missing required parameter: user_token",
            ));
        }
        Ok(())
    }

    fn connect(&self, arguments: &Settings) -> Result<Client> {
        let client = Client::connect(
            self.service.clone(),
            value(arguments, "user_token"),
            value(arguments, "instance_description"),
        );
        client.ensure_ready()?;
        Ok(client)
    }

    fn configure(&self, mut updates: Settings, out: &mut Sink) -> Result<()> {
        if updates.is_empty() && self.interactive {
            updates = prompt_context()?;
        }
        match self.store.configure(&updates) {
            SaveOutcome::Saved => log::info!("Configuration saved to {}", self.store.path().display()),
            SaveOutcome::Unchanged => log::debug!("Nothing to configure"),
            SaveOutcome::Failed(reason) => writeln!(
                out,
                "Unable to save config file at {} {} - continuing",
                self.store.path().display(),
                reason
            )?,
        }
        Ok(())
    }

    fn list(&self, arguments: &Settings, out: &mut Sink) -> Result<()> {
        let client = self.connect(arguments)?;
        let model_id = value(arguments, "model");
        if !model_id.is_empty() {
            let model = client.model(model_id)?;
            writeln!(out, "{}", model.metadata())?;
            return Ok(());
        }

        let models = with_spinner("Listing models...", || client.available_models())?;
        if models.is_empty() {
            writeln!(out, "No models available.")?;
        }
        for metadata in models {
            writeln!(out, "{}", metadata)?;
        }
        Ok(())
    }

    fn upload(&self, arguments: &Settings, out: &mut Sink) -> Result<()> {
        let metadata_path = value(arguments, "metadata");
        let metadata_text = String::from_utf8_lossy(&read_file(metadata_path)?).into_owned();
        let metadata: ModelMetadata = metadata_text.parse()?;
        let binary_model = read_file(value(arguments, "model"))?;

        let client = self.connect(arguments)?;
        let model = with_spinner("Uploading...", || {
            client.register_model(&metadata, &binary_model)
        })?;
        writeln!(out, "Model registered: {}", model.metadata().model_id)?;
        Ok(())
    }

    fn infer(&self, arguments: &Settings, patterns: &[String], mut out: Sink) -> Result<()> {
        let hints = DebugHints::parse(value(arguments, "debug"));
        let mode = hints.api()?;

        let files = expand_patterns(patterns, &mut out)?;
        if files.is_empty() {
            return Err(ClassinetError::usage("No valid file in parameter list."));
        }

        if !value(arguments, "marked").is_empty() {
            log::warn!("--marked is not supported by this client, no marked images are written");
        }
        let txt_dir = match value(arguments, "txt") {
            "" => None,
            dir => {
                fs::create_dir_all(dir)?;
                Some(PathBuf::from(dir))
            }
        };

        let client = self.connect(arguments)?;
        let model = client.model(value(arguments, "model"))?;

        let stats = hints.stats();
        let tracker = BatchTracker::new(
            files.len(),
            out,
            stats,
            Box::new(move |summary: &BatchSummary, out: &mut dyn Write| {
                if stats {
                    if let Err(e) = out.write_all(summary.report().as_bytes()) {
                        log::warn!("Unable to write statistics: {}", e);
                    }
                }
            }),
        )
        .with_progress(ProgressBar::new(files.len() as u64));
        let tracker = Arc::new(tracker);

        for file in &files {
            let image = match fs::read(file) {
                Ok(image) => image,
                Err(e) => {
                    log::debug!("Unable to read {}: {}", file, e);
                    tracker.fail_local(file, "unable to read file")?;
                    continue;
                }
            };
            tracker.begin(file)?;
            match mode {
                ApiMode::Async => submit(&model, &tracker, file, image, txt_dir.clone()),
                ApiMode::Sync => {
                    let result = model.infer(&image, "");
                    write_annotation(txt_dir.as_deref(), file, &result);
                    tracker.complete(file, result)?;
                }
            }
        }

        let summary = tracker.wait()?;
        log::info!(
            "Processed {} files, {} reached the service, average latency {}ms",
            summary.total_files,
            summary.real_files,
            summary.average_latency_ms()
        );
        Ok(())
    }
}

fn submit(
    model: &Model,
    tracker: &Arc<BatchTracker>,
    file: &str,
    image: Vec<u8>,
    txt_dir: Option<PathBuf>,
) {
    let tracker = tracker.clone();
    let file = file.to_string();
    model.async_infer(
        image,
        Some(Box::new(move |result: Result<String>| {
            write_annotation(txt_dir.as_deref(), &file, &result);
            if let Err(e) = tracker.complete(&file, result) {
                log::error!("Unable to record completion of {}: {}", file, e);
            }
        })),
        "",
    );
}

fn value<'a>(arguments: &'a Settings, key: &str) -> &'a str {
    arguments.get(key).map(String::as_str).unwrap_or("")
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        ClassinetError::Io(std::io::Error::new(
            e.kind(),
            format!("unable to read {}: {}", path, e),
        ))
    })
}

fn prompt_context() -> Result<Settings> {
    let user_token = Password::new()
        .with_prompt("User token (empty keeps the stored one, \"clear\" removes it)")
        .allow_empty_password(true)
        .interact()?;
    let instance_description: String = Input::new()
        .with_prompt("Instance description")
        .allow_empty(true)
        .interact_text()?;

    let mut updates = Settings::new();
    updates.insert("user_token".into(), user_token);
    updates.insert("instance_description".into(), instance_description);
    Ok(updates)
}

fn with_spinner<T>(message: &str, work: impl FnOnce() -> T) -> T {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = work();
    spinner.finish_and_clear();
    result
}

/// Files named by `patterns`: glob patterns are expanded first, then
/// regular files (or symlinks) are taken as given and directories walked
/// recursively. Patterns matching nothing are reported and skipped.
pub fn expand_patterns(patterns: &[String], out: &mut dyn Write) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let before = files.len();
        if is_glob(pattern) && !Path::new(pattern).exists() {
            match glob::glob(pattern) {
                Ok(paths) => {
                    for path in paths.filter_map(|entry| entry.ok()) {
                        collect_path(&path, &mut files);
                    }
                }
                Err(e) => {
                    log::debug!("Treating {} as a plain path: {}", pattern, e);
                    collect_path(Path::new(pattern), &mut files);
                }
            }
        } else {
            collect_path(Path::new(pattern), &mut files);
        }
        if files.len() == before {
            writeln!(out, "Ignoring not found files: {}", pattern)?;
        }
    }
    Ok(files)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(|c: char| c == '*' || c == '?' || c == '[')
}

fn collect_path(path: &Path, files: &mut Vec<String>) {
    if path.is_dir() {
        files.extend(
            WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.path().display().to_string()),
        );
    } else if path.is_file() || path.is_symlink() {
        files.push(path.display().to_string());
    }
}

/// Write the inference of `file` to `<dir>/<file stem>.txt`. Returns true
/// when an existing annotation was replaced.
fn write_annotation(dir: Option<&Path>, file: &str, result: &Result<String>) -> bool {
    let (dir, inference) = match (dir, result) {
        (Some(dir), Ok(inference)) => (dir, inference),
        _ => return false,
    };
    let stem = Path::new(file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "inference".into());
    let target = dir.join(format!("{}.txt", stem));
    let replaced = target.exists();
    if replaced {
        log::warn!(
            "Annotation {} already exists, overwriting it with the result of {}",
            target.display(),
            file
        );
    }
    if let Err(e) = fs::write(&target, inference) {
        log::warn!("Unable to write {}: {}", target.display(), e);
    }
    replaced
}
