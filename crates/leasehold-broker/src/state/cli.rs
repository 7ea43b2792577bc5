//! Table rendering for the operator CLI

use super::types::{Lease, Resource};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::collections::HashMap;

fn format_time(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Leases with resources shown by alias
pub fn lease_table(leases: &[Lease], resources: &[Resource]) -> Table {
    let aliases: HashMap<&str, &str> = resources
        .iter()
        .map(|r| (r.physical_id.as_str(), r.alias.as_str()))
        .collect();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("Name"),
            Cell::new("Owner"),
            Cell::new("Status"),
            Cell::new("Resource"),
            Cell::new("Days"),
            Cell::new("Ends"),
            Cell::new("Event"),
        ]);

    for lease in leases {
        let resource = lease
            .assigned_resource_id
            .as_deref()
            .or(lease.released_resource_id.as_deref())
            .map(|id| aliases.get(id).copied().unwrap_or(id))
            .unwrap_or("-");

        table.add_row(vec![
            Cell::new(lease.id),
            Cell::new(&lease.name),
            Cell::new(lease.owner_id.as_str()),
            Cell::new(lease.status.as_str()),
            Cell::new(resource),
            Cell::new(lease.desired_duration_days),
            Cell::new(format_time(lease.end_at)),
            Cell::new(lease.event_date.to_string()),
        ]);
    }

    table
}

/// Pool members and which lease holds each
pub fn resource_table(resources: &[Resource], active: &[Lease]) -> Table {
    let holders: HashMap<&str, i64> = active
        .iter()
        .filter_map(|l| l.assigned_resource_id.as_deref().map(|id| (id, l.id)))
        .collect();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Alias"),
            Cell::new("Server"),
            Cell::new("Lease"),
            Cell::new("Added"),
        ]);

    for resource in resources {
        let holder = holders
            .get(resource.physical_id.as_str())
            .map(|id| id.to_string())
            .unwrap_or_else(|| "free".to_string());

        table.add_row(vec![
            Cell::new(&resource.alias),
            Cell::new(&resource.physical_id),
            Cell::new(holder),
            Cell::new(resource.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    table
}
