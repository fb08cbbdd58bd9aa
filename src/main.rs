use std::process::ExitCode;

use anyhow::Context;
use fzimage::cli::app::App;
use fzimage::cli::report::Reporter;
use fzimage::components::recipe::{Assembly, Toolbox};
use fzimage::settings::Settings;
use log::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let app = App::from_env();

    if let Err(err) = fzimage::logger::init(app.verbose) {
        eprintln!("failed to set up logging: {err}");
    }

    match run(app).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "fzimage", "{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    let verbose = app.verbose;
    let settings = match &app.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let request = app.into_request().context("invalid arguments")?;
    let toolbox = Toolbox::system(&settings);

    let assembly = Assembly::prepare(&request, &settings, &toolbox)
        .with_context(|| format!("can't build {}", request.target.display()))?;
    let mut blueprint = assembly.blueprint();

    let reporter = Reporter::new(blueprint.steps_count(), verbose).spawn(blueprint.get_receiver());
    let built = blueprint.build(&assembly).await;

    if reporter.join().is_err() {
        error!(target: "fzimage", "progress reporter panicked");
    }

    built.with_context(|| {
        format!(
            "{} left incomplete after {:?}",
            request.target.display(),
            blueprint.state()
        )
    })
}
