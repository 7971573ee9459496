//! Sequential, fail-fast provisioning driver.
//!
//! A run is: preflight guards, plan construction, then every step of the plan
//! in order. The first failing action ends the run; nothing after it executes
//! and nothing before it is rolled back.

use tracing::{debug, info, instrument, warn};

use crate::core::plan::{PlanInputs, build_plan};
use crate::core::types::Plan;
use crate::error::ProvisionError;
use crate::io::config::ProvisionConfig;
use crate::io::executor::{ActionExecutor, CommandFailed};
use crate::io::host::Host;
use crate::io::tee::Tee;
use crate::preflight::{HostFacts, preflight};

/// Steps that ran to completion, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub completed_steps: Vec<String>,
}

/// Build the plan for a host that passed preflight.
pub fn plan_for(cfg: &ProvisionConfig, facts: &HostFacts) -> Plan {
    build_plan(&PlanInputs {
        kubernetes: &cfg.kubernetes,
        helm_install_script_url: &cfg.helm_install_script_url,
        accounts: &facts.accounts,
        cluster_state: facts.cluster_state,
    })
}

/// Run preflight, then the full plan. Failures are also reported through `tee`.
pub fn provision<E: ActionExecutor>(
    cfg: &ProvisionConfig,
    host: &Host,
    executor: &E,
    tee: &Tee,
) -> Result<ProvisionReport, ProvisionError> {
    let result = check_then_run(cfg, host, executor, tee);
    if let Err(err) = &result
        && let Err(tee_err) = tee.line(&error_line(err))
    {
        warn!(err = %tee_err, "failed to report error through output tee");
    }
    result
}

/// Final operator-visible line for a failed run, with the full error chain.
fn error_line(err: &ProvisionError) -> String {
    format!("ERROR: {err:#}")
}

fn check_then_run<E: ActionExecutor>(
    cfg: &ProvisionConfig,
    host: &Host,
    executor: &E,
    tee: &Tee,
) -> Result<ProvisionReport, ProvisionError> {
    tee.progress("Checking host")?;
    let facts = preflight(cfg, host)?;
    tee.line(&format!(
        "{} {} detected; operator account '{}'; cluster {:?}",
        facts.release.id,
        facts.release.version_id,
        facts.accounts.operator.name,
        facts.cluster_state
    ))?;
    let plan = plan_for(cfg, &facts);
    run_plan(&plan, executor, tee)
}

/// Execute `plan` step by step, stopping at the first failed action.
#[instrument(skip_all, fields(steps = plan.steps.len()))]
pub fn run_plan<E: ActionExecutor>(
    plan: &Plan,
    executor: &E,
    tee: &Tee,
) -> Result<ProvisionReport, ProvisionError> {
    let mut completed_steps = Vec::with_capacity(plan.steps.len());

    for step in &plan.steps {
        tee.progress(&step.name)?;
        for action in &step.actions {
            if let Err(err) = executor.execute(action, tee) {
                let exit_code = err
                    .downcast_ref::<CommandFailed>()
                    .and_then(|failed| failed.exit_code);
                debug!(step = %step.name, action = %action, exit_code = ?exit_code, "step failed");
                return Err(ProvisionError::StepFailed {
                    step: step.name.clone(),
                    action: action.to_string(),
                    exit_code,
                    detail: format!("{err:#}"),
                });
            }
        }
        info!(step = %step.name, "step completed");
        completed_steps.push(step.name.clone());
    }

    tee.progress("Provisioning complete")?;
    Ok(ProvisionReport { completed_steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, CommandSpec, Step};
    use crate::test_support::{ScriptedExecutor, memory_tee};

    fn plan() -> Plan {
        Plan {
            steps: vec![
                Step::new("first").run(CommandSpec::new("true")),
                Step::new("second")
                    .run(CommandSpec::new("apt-get").arg("update"))
                    .run(CommandSpec::new("apt-get").args(["install", "-y", "broken"])),
                Step::new("third").run(CommandSpec::new("true")),
            ],
        }
    }

    #[test]
    fn stops_at_first_failure() {
        let (tee, terminal, _syslog) = memory_tee();
        let executor = ScriptedExecutor::failing_on("install -y broken", 100);

        let err = run_plan(&plan(), &executor, &tee).unwrap_err();

        match &err {
            ProvisionError::StepFailed {
                step,
                action,
                exit_code,
                ..
            } => {
                assert_eq!(step, "second");
                assert_eq!(action, "apt-get install -y broken");
                assert_eq!(*exit_code, Some(100));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.exit_code(), 100);
        assert_eq!(executor.executed().len(), 3);
        assert!(!terminal.lines().contains(&"====> third".to_string()));
    }

    #[test]
    fn completes_every_step_in_order() {
        let (tee, terminal, syslog) = memory_tee();
        let executor = ScriptedExecutor::succeeding();

        let report = run_plan(&plan(), &executor, &tee).expect("run");

        assert_eq!(report.completed_steps, vec!["first", "second", "third"]);
        let markers: Vec<String> = terminal
            .lines()
            .into_iter()
            .filter(|line| line.starts_with("====> "))
            .collect();
        assert_eq!(
            markers,
            vec![
                "====> first",
                "====> second",
                "====> third",
                "====> Provisioning complete"
            ]
        );
        assert_eq!(terminal.lines(), syslog.lines());
    }

    #[test]
    fn error_line_carries_internal_error_chain() {
        let err = ProvisionError::from(
            anyhow::anyhow!("broken pipe").context("write to logger"),
        );
        assert_eq!(error_line(&err), "ERROR: write to logger: broken pipe");
    }

    #[test]
    fn error_line_for_step_failure_names_step() {
        let err = ProvisionError::StepFailed {
            step: "Install Helm".to_string(),
            action: "curl -fsSL URL | bash".to_string(),
            exit_code: Some(22),
            detail: "`curl -fsSL URL | bash` exited with status 22".to_string(),
        };
        assert_eq!(
            error_line(&err),
            "ERROR: step 'Install Helm' failed: `curl -fsSL URL | bash` exited with status 22"
        );
    }

    #[test]
    fn non_command_failure_has_no_exit_code() {
        let (tee, _terminal, _syslog) = memory_tee();
        let executor = ScriptedExecutor::erroring_on("write /etc/sysctl.d/k8s.conf");
        let plan = Plan {
            steps: vec![Step::new("sysctl").then(Action::WriteFile {
                path: "/etc/sysctl.d/k8s.conf".into(),
                contents: String::new(),
            })],
        };

        let err = run_plan(&plan, &executor, &tee).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::FAILED);
    }
}
