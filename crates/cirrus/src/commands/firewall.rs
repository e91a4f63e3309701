use crate::utils::{self, App};
use crate::{FirewallCommands, Traffic};
use cirrus_cloud::{FirewallRule, RuleState, TrafficDirection};
use cirrus_network::{CreateFirewallRule, FirewallManager};
use colored::Colorize;

impl From<Traffic> for TrafficDirection {
    fn from(traffic: Traffic) -> Self {
        match traffic {
            Traffic::Ingress => TrafficDirection::Ingress,
            Traffic::Egress => TrafficDirection::Egress,
        }
    }
}

pub async fn handle(app: &App, cmd: FirewallCommands) -> anyhow::Result<()> {
    let manager = FirewallManager::new(app.store.clone());

    match cmd {
        FirewallCommands::Create {
            network,
            protocol,
            traffic,
            start_port,
            end_port,
            icmp_type,
            icmp_code,
            source_cidrs,
            destination_cidrs,
            hidden,
        } => {
            let request = CreateFirewallRule {
                start_port,
                end_port,
                icmp_type,
                icmp_code,
                source_cidrs,
                destination_cidrs,
                display: !hidden,
                ..CreateFirewallRule::new(network, protocol, traffic.into())
            };
            let rule = manager.create(&app.ctx, request).await?;
            report(app, &rule, "Created rule")
        }
        FirewallCommands::List { network } => {
            let rules = manager.list(network).await;
            if app.json {
                return app.print_json(&rules);
            }
            print_table(&rules);
            Ok(())
        }
        FirewallCommands::Update { id, display } => {
            let rule = manager.update_display(&app.ctx, id, display).await?;
            report(app, &rule, "Updated rule")
        }
        FirewallCommands::Revoke { id } => {
            let rule = manager.revoke(&app.ctx, id).await?;
            report(app, &rule, "Revoked rule")
        }
        FirewallCommands::Apply { id } => {
            if !manager.apply(id).await? {
                anyhow::bail!("Firewall rule {} not found", id);
            }
            utils::success(format!("Applied pending rules of rule {}'s network", id));
            Ok(())
        }
    }
}

fn report(app: &App, rule: &FirewallRule, action: &str) -> anyhow::Result<()> {
    if app.json {
        return app.print_json(rule);
    }
    utils::success(format!("{} {} [{}]", action, rule.id, rule.state));
    Ok(())
}

fn ports(rule: &FirewallRule) -> String {
    match (rule.start_port, rule.end_port) {
        (Some(start), Some(end)) if start != end => format!("{}-{}", start, end),
        (Some(start), _) => start.to_string(),
        _ => "-".to_string(),
    }
}

fn print_table(rules: &[FirewallRule]) {
    if rules.is_empty() {
        println!("{}", "No firewall rules found".dimmed());
        return;
    }

    utils::print_header(
        &format!(
            "{:<6} {:<8} {:<6} {:<12} {:<8} {}",
            "ID", "TRAFFIC", "PROTO", "PORTS", "STATE", "SOURCES"
        ),
        64,
    );
    for rule in rules.iter().filter(|r| r.display) {
        let state = match rule.state {
            RuleState::Active => rule.state.to_string().green(),
            RuleState::Revoke => rule.state.to_string().red(),
            RuleState::Staged | RuleState::Add => rule.state.to_string().yellow(),
        };
        let sources = if rule.source_cidrs.is_empty() {
            "any".to_string()
        } else {
            rule.source_cidrs
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "{:<6} {:<8} {:<6} {:<12} {:<8} {}",
            rule.id,
            rule.traffic.to_string(),
            rule.protocol.to_string(),
            ports(rule),
            state,
            sources.cyan(),
        );
    }
}
