//! Status command - compare the local version with the server.

use console::style;
use patchup::Updater;

use super::GlobalArgs;
use crate::error::CliError;

/// Run the status command.
pub fn run(global: &GlobalArgs) -> Result<(), CliError> {
    let config = global.resolve_config()?;
    let update_dir = config.update_dir.clone();
    let status = Updater::new(config).status()?;

    println!("Update directory: {}", update_dir.display());
    println!(
        "Local version:    {}{}",
        status.current.as_deref().unwrap_or("<none>"),
        if status.obfuscated { " (obfuscated)" } else { "" }
    );
    println!("Server version:   {}", status.missing.newest);

    if status.missing.is_empty() {
        println!("{}", style("Up to date").green());
        return Ok(());
    }

    if status.missing.restarted {
        println!(
            "{}",
            style("Local version is unknown to the server, every version will be applied")
                .yellow()
        );
    }
    println!("Pending versions ({}):", status.missing.versions.len());
    for version in &status.missing.versions {
        println!("  - {}", version);
    }
    Ok(())
}
