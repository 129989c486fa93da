//! Read-only commands over persisted state: `status` and `lessons`.

use anyhow::Result;
use std::path::Path;

pub fn cmd_status(target: &Path) -> Result<()> {
    use phasegate::config::Config;
    use phasegate::orchestrator::{PipelineRun, StateManager};
    use phasegate::ui::print_status;

    let config = Config::paths_only(target)?;
    match PipelineRun::load(&config.run_file)? {
        Some(run) => {
            let entries = StateManager::new(config.state_file.clone()).get_entries()?;
            print_status(&run, &entries);
        }
        None => {
            println!();
            println!(
                "No run recorded for {}. Start one with 'phasegate run {}'.",
                config.target_dir.display(),
                target.display()
            );
            println!();
        }
    }
    Ok(())
}

pub fn cmd_lessons(target: &Path, global: bool) -> Result<()> {
    use phasegate::config::Config;
    use phasegate::lessons::{LessonScope, LessonStore};
    use phasegate::ui::print_lessons;

    // The pipeline file may move the global log; without one the defaults apply.
    let paths = Config::paths_only(target)?;
    let config = if paths.config_file.exists() {
        Config::new(target, None, false, false)?
    } else {
        paths
    };

    let store = LessonStore::from_config(&config);
    let scope = if global {
        LessonScope::Global
    } else {
        LessonScope::Project
    };
    let entries = store.entries(scope)?;
    print_lessons(scope, store.path(scope), &entries);
    Ok(())
}
