//! CLI output formatting utilities

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use crate::inventory::InventoryReport;
use crate::messages::{to_hex, GatewayEvent, GatewayStatus};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print a warning message
pub fn warn(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// Gateway state as a colored word
pub fn format_state(online: bool) -> String {
    if online {
        "online".green().to_string()
    } else {
        "offline".red().to_string()
    }
}

/// One line per event, for `listen`
pub fn format_event(event: &GatewayEvent) -> String {
    match event {
        GatewayEvent::Status(status) => format!(
            "{} {} {} version {}",
            status.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            status.gw_id.bold(),
            format_state(status.online),
            status.version
        ),
        GatewayEvent::Packet(packet) => format!(
            "{} {}/{} [{}] {} -> {} ep {}/{} travel {} ms: {}",
            packet.rx_time.format("%Y-%m-%d %H:%M:%S%.3f"),
            packet.gw_id.bold(),
            packet.sink_id,
            packet.kind.to_string().cyan(),
            packet.source_address,
            packet.destination_address,
            packet.source_endpoint,
            packet.destination_endpoint,
            packet.travel_time_ms,
            to_hex(&packet.payload)
        ),
    }
}

/// Print the latest known state of every gateway
pub fn print_gateway_table(gateways: &[GatewayStatus]) {
    if gateways.is_empty() {
        info("No gateway status received. Try a longer --duration");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Gateway").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Version").fg(Color::Cyan),
            Cell::new("Last event").fg(Color::Cyan),
        ]);

    for gateway in gateways {
        let (state, color) = if gateway.online {
            ("online", Color::Green)
        } else {
            ("offline", Color::Red)
        };

        table.add_row(vec![
            Cell::new(&gateway.gw_id),
            Cell::new(state).fg(color),
            Cell::new(gateway.version),
            Cell::new(gateway.time.format("%Y-%m-%d %H:%M:%S UTC")),
        ]);
    }

    println!("{table}");
}

/// Print a summary of the inventory rounds
pub fn print_inventory_table(reports: &[InventoryReport]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Round").fg(Color::Cyan),
            Cell::new("Outcome").fg(Color::Cyan),
            Cell::new("Elapsed (s)").fg(Color::Cyan),
            Cell::new("Seen").fg(Color::Cyan),
            Cell::new("Targets").fg(Color::Cyan),
            Cell::new("Difference").fg(Color::Cyan),
        ]);

    for report in reports {
        let difference = report
            .difference
            .iter()
            .map(|node| node.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            Cell::new(report.sequence),
            Cell::new(format!("{:?}", report.outcome)),
            Cell::new(format!("{:.1}", report.elapsed)),
            Cell::new(report.nodes_seen),
            Cell::new(report.target_nodes),
            Cell::new(if difference.is_empty() { "-".to_string() } else { difference }),
        ]);
    }

    println!("{table}");
}
