//! Terminal rendering of run records and verification reports.

use comfy_table::{Table, presets::UTF8_FULL};
use fantasy_deploy::{RunRecord, VerificationReport};

pub fn deployment_table(record: &RunRecord) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Component", "Contract", "Address", "Block"]);

    for (name, component) in record.components.iter() {
        let block = match (component.block_number, component.external) {
            (_, true) => "external".to_string(),
            (Some(block), false) => block.to_string(),
            (None, false) => "-".to_string(),
        };
        table.add_row(vec![
            name.to_string(),
            component.contract.clone(),
            component.address.to_string(),
            block,
        ]);
    }

    table
}

pub fn wiring_table(record: &RunRecord) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Component", "Hook", "Target", "Block"]);

    for wiring in &record.wiring {
        table.add_row(vec![
            wiring.component.clone(),
            wiring.hook.clone(),
            wiring.target.clone(),
            wiring
                .block_number
                .map(|block| block.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    table
}

pub fn verification_table(report: &VerificationReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Component", "Address", "Verification"]);

    for entry in report.entries() {
        table.add_row(vec![
            entry.component.clone(),
            entry.address.to_string(),
            entry.outcome.to_string(),
        ]);
    }

    table
}

pub fn print_record(record: &RunRecord) {
    println!(
        "Network: {} (chain {})  Deployer: {}  Block: {}  Status: {}  At: {}",
        record.network.name,
        record.network.chain_id,
        record.deployer,
        record.block_number,
        record.status,
        record.timestamp
    );
    println!("{}", deployment_table(record));
    if !record.wiring.is_empty() {
        println!("{}", wiring_table(record));
    }
    if let Some(failure) = &record.failure {
        println!("Stopped: {}", failure.cause);
        if let Some(tx_hash) = failure.pending_tx {
            println!("Transaction {tx_hash} has no known outcome, --resume looks it up first");
        }
    }
}

pub fn print_report(report: &VerificationReport) {
    println!("{}", verification_table(report));
    println!(
        "{} verified, {} failed, {} skipped",
        report.verified(),
        report.failed(),
        report.skipped()
    );
}
