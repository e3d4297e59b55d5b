//! Deployment commands
//!
//! - `apply` - validate, plan, confirm and converge every node
//! - `plan` - validate and print each node's ordered declarations
//! - `status` - probe every declaration and show what apply would change
//! - `validate` - pre-flight checks only
//!
//! Validation always runs first; nothing is planned and no node is contacted
//! until the whole deployment checks out.

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use converge::{Credential, FailurePolicy, ReconcileError, RunPlan, RunReport, Transport};
use log::debug;

use crate::Context;
use crate::cli::{ApplyArgs, DeployArgs, PlanArgs, StatusArgs};
use crate::config::DeploymentConfig;
use crate::engine::differ::{collect_diffs, display_diff};
use crate::engine::planner::display_plan;
use crate::engine::{ApplyOptions, build_plan, execute, executor};
use crate::progress;
use crate::transport::PsRemotingTransport;
use crate::ui;

/// A validated deployment, ready to plan
struct Deployment {
    config: DeploymentConfig,
    credential: Credential,
}

impl Deployment {
    /// Load the config, merge flags, read the password and validate
    fn prepare(args: &DeployArgs) -> Result<Self> {
        let mut config = DeploymentConfig::load_or_default(args.config.as_deref())?;
        config.merge_args(args);
        let password = std::env::var(&config.credential.password_env).ok();
        Self::validated(config, password)
    }

    fn validated(config: DeploymentConfig, password: Option<String>) -> Result<Self> {
        if let Err(error) = crate::validate::preflight(&config, password.as_deref()) {
            if let ReconcileError::ValidationFailure { problems } = &error {
                ui::error("Pre-flight validation failed:");
                for problem in problems {
                    eprintln!("    {} {problem}", "•".red());
                }
            }
            return Err(error.into());
        }

        let credential = Credential::new(
            config.credential.user.clone().unwrap_or_default(),
            password.unwrap_or_default(),
        );
        Ok(Self { config, credential })
    }

    fn plan(&self) -> Result<RunPlan> {
        let pb = progress::spinner("Compiling plan...");
        let plan = build_plan(&self.config);
        pb.finish_and_clear();
        let plan = plan.context("Failed to compile the deployment plan")?;
        debug!(
            "plan: {} declarations on {} nodes",
            plan.total_declarations(),
            plan.nodes.len()
        );
        Ok(plan)
    }

    fn transport(&self) -> Result<PsRemotingTransport> {
        let transport = PsRemotingTransport::detect()?;
        Ok(match &self.config.credential.authentication {
            Some(mechanism) => transport.with_authentication(mechanism),
            None => transport,
        })
    }

    fn apply_options(&self, ctx: &Context) -> ApplyOptions {
        ApplyOptions {
            verbose: ctx.verbose > 0,
            quiet: ctx.quiet,
            barrier_wait: self.config.retry.barrier.to_retry_config(),
            ..ApplyOptions::default()
        }
    }
}

/// Plan and converge against `transport`
fn converge_with(
    deployment: &Deployment,
    transport: &dyn Transport,
    opts: &ApplyOptions,
) -> Result<Option<RunReport>> {
    let plan = deployment.plan()?;
    execute(&plan, transport, &deployment.credential, opts)
}

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    ui::header(if args.dry_run {
        "sqlfleet apply (dry run)"
    } else {
        "sqlfleet apply"
    });

    let deployment = Deployment::prepare(&args.deploy)?;
    let transport = deployment.transport()?;
    let opts = ApplyOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        failure_policy: if args.fail_fast {
            FailurePolicy::AbortNode
        } else {
            FailurePolicy::ContinueIndependent
        },
        report: args.report,
        ..deployment.apply_options(ctx)
    };

    let Some(report) = converge_with(&deployment, &transport, &opts)? else {
        return Ok(());
    };
    finish(&report)
}

/// Turn a failed run into a non-zero exit
fn finish(report: &RunReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let summary = report.summary();
    bail!(
        "{} declarations failed, {} blocked",
        summary.failed,
        summary.blocked
    )
}

pub fn plan(_ctx: &Context, args: PlanArgs) -> Result<()> {
    let deployment = Deployment::prepare(&args.deploy)?;
    let plan = deployment.plan()?;

    if args.json {
        let nodes: Vec<_> = plan
            .nodes
            .iter()
            .map(|n| {
                serde_json::json!({
                    "node": n.node,
                    "declarations": n.describe(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    ui::header("sqlfleet plan");
    display_plan(&plan, args.target.as_deref());
    println!();
    ui::info(&format!(
        "{} declarations on {} nodes",
        plan.total_declarations(),
        plan.nodes.len()
    ));
    Ok(())
}

pub fn status(ctx: &Context, args: StatusArgs) -> Result<()> {
    ui::header("sqlfleet status");

    let deployment = Deployment::prepare(&args.deploy)?;
    let plan = deployment.plan()?;
    let transport = deployment.transport()?;
    let report = executor::probe(
        &plan,
        &transport,
        &deployment.credential,
        &deployment.apply_options(ctx),
    )?;

    let mut pending = 0;
    for (node, diffs) in collect_diffs(&report, args.target.as_deref()) {
        pending += diffs.len();
        display_diff(node, &diffs);
    }

    let unreachable: Vec<_> = report
        .failures()
        .filter(|(_, r)| {
            matches!(r.outcome.error(), Some(ReconcileError::UnreachableNode { .. }))
        })
        .map(|(node, _)| node.name.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    println!();
    for node in &unreachable {
        ui::warn(&format!("{node} could not be reached"));
    }
    if pending == 0 && unreachable.is_empty() {
        ui::success("Every node is converged");
    } else if pending > 0 {
        ui::info(&format!("{pending} declarations would change"));
    }
    Ok(())
}

pub fn validate(_ctx: &Context, args: DeployArgs) -> Result<()> {
    let deployment = Deployment::prepare(&args)?;
    let primary = deployment.config.nodes.first().map_or("", |n| n.name.as_str());
    ui::success(&format!(
        "Deployment is valid: {} nodes, primary {primary}",
        deployment.config.nodes.len()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurations::tests as fixtures;
    use converge::testing::FakeTransport;

    fn quiet() -> ApplyOptions {
        ApplyOptions {
            yes: true,
            quiet: true,
            ..ApplyOptions::default()
        }
    }

    #[test]
    fn test_missing_install_source_stops_before_any_session() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.install.source = Some(media.path().join("missing"));
        let transport = FakeTransport::new();

        let result = Deployment::validated(config, Some("secret".into()))
            .and_then(|d| converge_with(&d, &transport, &quiet()));

        let error = result.unwrap_err();
        let problems = match error.downcast_ref::<ReconcileError>() {
            Some(ReconcileError::ValidationFailure { problems }) => problems.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("does not exist"));
        assert_eq!(transport.opened(), 0);
    }

    #[test]
    fn test_missing_password_is_a_validation_problem() {
        let media = fixtures::media();
        let config = fixtures::deployment(media.path());
        let error = Deployment::validated(config, None).err().unwrap();
        assert!(error.to_string().contains("password variable"));
    }

    #[test]
    fn test_credential_comes_from_config_and_password() {
        let media = fixtures::media();
        let config = fixtures::deployment(media.path());
        let deployment = Deployment::validated(config, Some("secret".into())).unwrap();
        assert_eq!(deployment.credential.user, r"CONTOSO\svc-sqlinstall");

        let ctx = Context {
            verbose: 1,
            quiet: true,
        };
        let opts = deployment.apply_options(&ctx);
        assert!(opts.verbose && opts.quiet);
        assert_eq!(opts.failure_policy, FailurePolicy::ContinueIndependent);
    }

    #[test]
    fn test_finish_fails_on_failed_run() {
        use converge::{ExecutionOutcome, ExecutionResult, NodeReport, NodeRole, TargetNode};

        let mut node = NodeReport::new(TargetNode::new("sql01", NodeRole::Primary));
        node.results.push(ExecutionResult {
            resource_id: "disk:E:".into(),
            resource_type: "disk".into(),
            description: "Disk E:".into(),
            outcome: ExecutionOutcome::Failed {
                error: ReconcileError::permanent("Format-Volume failed"),
            },
            attempts: 1,
            diff: None,
        });
        let report = RunReport { nodes: vec![node] };
        assert!(finish(&report).is_err());
        assert!(finish(&RunReport::default()).is_ok());
    }
}
