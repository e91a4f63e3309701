use crate::ControllerCommands;
use crate::utils::{self, App};
use cirrus_cloud::Controller;
use cirrus_controlplane::{GarbageCollector, SweepReport};
use colored::Colorize;
use std::sync::Arc;

pub async fn handle(app: &App, cmd: ControllerCommands) -> anyhow::Result<()> {
    let orchestrator = app.orchestrator();

    match cmd {
        ControllerCommands::List { zone, state, gc } => {
            let mut controllers = match zone {
                Some(zone) => orchestrator.list_in_zone(zone).await,
                None => app.store.list_all::<Controller>().await,
            };
            if let Some(state) = state {
                controllers.retain(|c| c.state == state);
            }
            if gc {
                controllers.retain(Controller::is_gc_pending);
            }

            if app.json {
                return app.print_json(&controllers);
            }
            print_table(&controllers);
            Ok(())
        }
        ControllerCommands::Destroy { id } => {
            let controller = app.store.get::<Controller>(id).await?;
            println!(
                "Destroying controller {} ({} s convergence budget)...",
                controller.name.cyan(),
                app.retry.interval.as_secs() * u64::from(app.retry.max_attempts)
            );

            if orchestrator.destroy(&app.ctx, id).await? {
                utils::success(format!("Destroyed controller {}", controller.name));
            } else {
                println!(
                    "{}",
                    format!(
                        "Controller {} was torn down but its record remains; it is queued for GC",
                        controller.name
                    )
                    .yellow()
                );
            }
            Ok(())
        }
        ControllerCommands::Mark { id } => {
            if orchestrator.mark_for_gc(id).await? {
                utils::success(format!("Controller {} queued for GC", id));
            } else {
                println!("{}", format!("Controller {} not found", id).yellow());
            }
            Ok(())
        }
        ControllerCommands::Gc => {
            let report = GarbageCollector::new(Arc::new(orchestrator))
                .sweep(&app.ctx)
                .await;
            if app.json {
                app.print_json(&report)?;
            } else {
                print_report(&report);
            }
            if !report.is_success() {
                anyhow::bail!("{} controller(s) could not be collected", report.failed.len());
            }
            Ok(())
        }
    }
}

fn print_table(controllers: &[Controller]) {
    if controllers.is_empty() {
        println!("{}", "No controllers found".dimmed());
        return;
    }

    utils::print_header(
        &format!(
            "{:<6} {:<20} {:<6} {:<8} {:<12} {:<4}",
            "ID", "NAME", "ZONE", "NETWORK", "STATE", "GC"
        ),
        60,
    );
    for controller in controllers {
        let gc = if controller.gc_requested_at.is_some() {
            "yes".yellow()
        } else {
            "".normal()
        };
        println!(
            "{:<6} {:<20} {:<6} {:<8} {:<12} {:<4}",
            controller.id,
            controller.name.cyan(),
            utils::or_dash(controller.zone_id),
            utils::or_dash(controller.network_id),
            utils::colored_state(controller.state),
            gc,
        );
    }
}

fn print_report(report: &SweepReport) {
    println!();
    println!("{}", "GC sweep".bold());
    println!("{}", "─".repeat(40).dimmed());
    for entry in &report.succeeded {
        println!("  {} {} ({})", "✓".green(), entry.name, entry.controller_id);
    }
    for entry in &report.failed {
        println!(
            "  {} {} ({}): {}",
            "✗".red(),
            entry.name,
            entry.controller_id,
            entry.error.as_deref().unwrap_or("unknown error").red()
        );
    }
    println!(
        "{} collected, {} pending, {} ms",
        report.succeeded.len(),
        report.failed.len(),
        report.duration_ms
    );
}
