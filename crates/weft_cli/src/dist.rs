//! `weft create-launcher`, `weft generate-dev-bundle`, and `weft publish`.

use weft_build::{BuildError, Orchestrator, PackagedArtifact};

use crate::pipeline::{open_session, status};
use crate::GlobalArgs;

fn print_packaged(global: &GlobalArgs, packaged: &PackagedArtifact) {
    status(global, "Packaged", &packaged.artifact.coordinates);
    status(global, "Wrote", packaged.path.display());
    if global.verbose {
        eprintln!("             sha256 {}", packaged.artifact.sha256);
    }
}

/// Runs `weft create-launcher`.
pub fn create_launcher(global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    let packaged = orchestrator.create_launcher()?;
    print_packaged(global, &packaged);
    Ok(0)
}

/// Runs `weft generate-dev-bundle`.
pub fn generate_dev_bundle(global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    let packaged = orchestrator.generate_dev_bundle()?;
    print_packaged(global, &packaged);
    Ok(0)
}

/// Runs `weft publish [--dev-bundle]`.
pub fn publish(dev_bundle: bool, global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    let published = orchestrator.publish(dev_bundle)?;
    for entry in &published {
        status(global, "Published", format!("{} ({})", entry.coordinates, entry.path));
    }
    Ok(0)
}
