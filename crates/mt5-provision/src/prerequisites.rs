use crate::config::ProvisionConfig;

/// Result of a prerequisite check.
pub struct PrerequisiteCheck {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Check that every program the sequence will invoke is on `PATH`.
///
/// Missing programs are not fatal: the affected steps fail on their own
/// and are reported there. This only gives an early hint in the log.
pub fn check_prerequisites(config: &ProvisionConfig) -> PrerequisiteCheck {
    let mut programs: Vec<&str> = vec![config.wine_bin.as_str()];
    let commands = config
        .dependencies
        .iter()
        .map(|d| &d.install)
        .chain([
            &config.application.component.install,
            &config.application.launch,
            &config.application.compat_flag,
        ])
        .chain(config.services.iter().map(|s| &s.command));
    for cmd in commands {
        if !programs.contains(&cmd.program.as_str()) {
            programs.push(cmd.program.as_str());
        }
    }

    let errors: Vec<String> = programs
        .into_iter()
        // `{artifact}` programs are resolved at install time.
        .filter(|p| !p.contains(crate::command::ARTIFACT_PLACEHOLDER))
        .filter(|p| which::which(p).is_err())
        .map(|p| format!("Required command not found: {p}"))
        .collect();

    PrerequisiteCheck {
        ok: errors.is_empty(),
        errors,
    }
}
