//! Fix up registration outputs after they were pulled from the cluster.
//!
//! Transform parameter files chain to each other through absolute paths
//! (`InitialTransformParametersFileName`), and those paths point into the
//! remote root until rewritten.

use regraph_core::{RegistrationProblem, Resolution};
use std::path::Path;
use tracing::{info, warn};

/// One file (or problem directory) that could not be rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteError {
    pub problem: RegistrationProblem,
    /// `None` when the problem directory itself could not be read.
    pub resolution: Option<Resolution>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteReport {
    pub rewritten: usize,
    pub errors: Vec<RewriteError>,
}

/// Parse `TransformParameters.<p>.R<r>.txt`.
fn parse_transform_file_name(name: &str) -> Option<Resolution> {
    let rest = name
        .strip_prefix("TransformParameters.")?
        .strip_suffix(".txt")?;
    let (p, r) = rest.split_once(".R")?;
    Some(Resolution::new(p.parse().ok()?, r.parse().ok()?))
}

/// Directory prefix of `root` including the trailing separator, so that
/// `/scratch/run` does not match inside `/scratch/run2`.
fn root_prefix(root: &Path) -> String {
    format!("{}/", root.display().to_string().trim_end_matches('/'))
}

/// Replace `remote_root` with `local_root` inside every transform parameter
/// file under `reg_dir/<problem>`. Failures are collected, not returned early.
///
/// Only paths below `remote_root` are rewritten. `local_root` should be
/// absolute for the rewritten files to resolve from any directory.
pub fn rewrite_parameter_paths(
    reg_dir: &Path,
    problems: &[RegistrationProblem],
    remote_root: &Path,
    local_root: &Path,
) -> RewriteReport {
    let remote = root_prefix(remote_root);
    let local = root_prefix(local_root);
    let mut report = RewriteReport::default();

    for &problem in problems {
        let dir = reg_dir.join(problem.dir_name());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                report.errors.push(RewriteError {
                    problem,
                    resolution: None,
                    message: format!("{}: {}", dir.display(), e),
                });
                continue;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(resolution) = name.to_str().and_then(parse_transform_file_name) else {
                continue;
            };
            let path = entry.path();
            let result = std::fs::read_to_string(&path).and_then(|content| {
                if content.contains(&remote) {
                    std::fs::write(&path, content.replace(&remote, &local))
                } else {
                    Ok(())
                }
            });
            match result {
                Ok(()) => report.rewritten += 1,
                Err(e) => report.errors.push(RewriteError {
                    problem,
                    resolution: Some(resolution),
                    message: format!("{}: {}", path.display(), e),
                }),
            }
        }
    }

    if report.errors.is_empty() {
        info!("Rewrote {} transform parameter files", report.rewritten);
    } else {
        warn!(
            "Rewrote {} transform parameter files, {} failed",
            report.rewritten,
            report.errors.len()
        );
    }
    report
}
