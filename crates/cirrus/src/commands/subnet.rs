use crate::SubnetCommands;
use crate::utils::{self, App};
use cirrus_cloud::Subnet;
use cirrus_network::{Dedication, SubnetFilter, SubnetManager, parse_cidr};
use colored::Colorize;

pub async fn handle(app: &App, cmd: SubnetCommands) -> anyhow::Result<()> {
    let manager = SubnetManager::new(app.store.clone());

    match cmd {
        SubnetCommands::Create { zone, cidr } => {
            let subnet = manager.create_subnet(zone, parse_cidr(&cidr)?).await?;
            report(app, &subnet, "Created subnet")
        }
        SubnetCommands::Update { id, cidr } => {
            let subnet = manager.update_subnet(id, parse_cidr(&cidr)?).await?;
            report(app, &subnet, "Updated subnet")
        }
        SubnetCommands::Delete { id } => {
            if manager.delete_subnet(id).await? {
                utils::success(format!("Deleted subnet {}", id));
            } else {
                println!("{}", format!("Subnet {} was already gone", id).yellow());
            }
            Ok(())
        }
        SubnetCommands::List {
            zone,
            cidr,
            domain,
            account,
        } => {
            let filter = SubnetFilter {
                zone_id: zone,
                cidr: cidr.as_deref().map(parse_cidr).transpose()?,
                domain_id: domain,
                account_id: account,
                ..Default::default()
            };
            let subnets = manager.list_subnets(&filter).await;
            if app.json {
                return app.print_json(&subnets);
            }
            print_table(&subnets);
            Ok(())
        }
        SubnetCommands::Dedicate {
            id,
            domain,
            account,
        } => {
            let dedication = Dedication {
                domain_id: domain,
                account_id: account,
            };
            let subnet = manager.dedicate_subnet(id, dedication).await?;
            report(app, &subnet, "Dedicated subnet")
        }
        SubnetCommands::Release { id } => {
            let subnet = manager.release_dedication(id).await?;
            report(app, &subnet, "Released subnet")
        }
    }
}

fn report(app: &App, subnet: &Subnet, action: &str) -> anyhow::Result<()> {
    if app.json {
        return app.print_json(subnet);
    }
    utils::success(format!(
        "{} {} ({})",
        action,
        subnet.id,
        subnet.cidr.to_string().cyan()
    ));
    Ok(())
}

fn print_table(subnets: &[Subnet]) {
    if subnets.is_empty() {
        println!("{}", "No subnets found".dimmed());
        return;
    }

    utils::print_header(
        &format!(
            "{:<6} {:<6} {:<20} {:<8} {:<8}",
            "ID", "ZONE", "CIDR", "DOMAIN", "ACCOUNT"
        ),
        52,
    );
    for subnet in subnets {
        println!(
            "{:<6} {:<6} {:<20} {:<8} {:<8}",
            subnet.id,
            subnet.zone_id,
            subnet.cidr.to_string().cyan(),
            utils::or_dash(subnet.domain_id),
            utils::or_dash(subnet.account_id),
        );
    }
}
