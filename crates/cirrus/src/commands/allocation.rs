use crate::AllocationCommands;
use crate::utils::{self, App};
use cirrus_cloud::{AllocationState, Network, SubnetAllocation};
use cirrus_network::{AllocationFilter, AllocationRequest, SubnetManager, parse_cidr};
use colored::Colorize;

fn request(cidr: Option<String>, prefix_length: Option<u8>) -> anyhow::Result<AllocationRequest> {
    match (cidr, prefix_length) {
        (Some(cidr), _) => Ok(AllocationRequest::Cidr(parse_cidr(&cidr)?)),
        (None, Some(len)) => Ok(AllocationRequest::PrefixLength(len)),
        (None, None) => anyhow::bail!("either --cidr or --prefix-length is required"),
    }
}

pub async fn handle(app: &App, cmd: AllocationCommands) -> anyhow::Result<()> {
    let manager = SubnetManager::new(app.store.clone());

    match cmd {
        AllocationCommands::Create {
            parent,
            cidr,
            prefix_length,
        } => {
            let allocation = manager
                .create_allocation(parent, request(cidr, prefix_length)?)
                .await?;
            report(app, &allocation, "Created block")
        }
        AllocationCommands::Delete { id } => {
            manager.delete_allocation(id).await?;
            utils::success(format!("Deleted block {}", id));
            Ok(())
        }
        AllocationCommands::List { zone, parent } => {
            let filter = AllocationFilter {
                zone_id: zone,
                parent_id: parent,
                ..Default::default()
            };
            let allocations = manager.list_allocations(&filter).await;
            if app.json {
                return app.print_json(&allocations);
            }
            print_table(&allocations);
            Ok(())
        }
        AllocationCommands::Assign {
            network,
            cidr,
            prefix_length,
        } => {
            let network = app.store.get::<Network>(network).await?;
            let allocation = match request(cidr, prefix_length)? {
                AllocationRequest::Cidr(cidr) => {
                    manager.assign_cidr_to_network(&network, cidr).await?
                }
                AllocationRequest::PrefixLength(len) => {
                    manager.allocate_by_size(&network, len).await?
                }
            };
            report(app, &allocation, &format!("Assigned to {}", network.name))
        }
        AllocationCommands::Release { network } => {
            if manager.release_for_network(network).await? {
                utils::success(format!("Released the block of network {}", network));
            } else {
                println!(
                    "{}",
                    format!("Network {} has no block assigned", network).yellow()
                );
            }
            Ok(())
        }
    }
}

fn report(app: &App, allocation: &SubnetAllocation, action: &str) -> anyhow::Result<()> {
    if app.json {
        return app.print_json(allocation);
    }
    utils::success(format!(
        "{}: block {} ({})",
        action,
        allocation.id,
        allocation.cidr.to_string().cyan()
    ));
    Ok(())
}

fn print_table(allocations: &[SubnetAllocation]) {
    if allocations.is_empty() {
        println!("{}", "No blocks found".dimmed());
        return;
    }

    utils::print_header(
        &format!(
            "{:<6} {:<8} {:<20} {:<10} {:<8}",
            "ID", "PARENT", "CIDR", "STATE", "NETWORK"
        ),
        56,
    );
    for allocation in allocations {
        let state = match allocation.state {
            AllocationState::Free => allocation.state.to_string().green(),
            AllocationState::Allocated => allocation.state.to_string().yellow(),
        };
        println!(
            "{:<6} {:<8} {:<20} {:<10} {:<8}",
            allocation.id,
            utils::or_dash(allocation.parent_id),
            allocation.cidr.to_string().cyan(),
            state,
            utils::or_dash(allocation.network_id),
        );
    }
}
