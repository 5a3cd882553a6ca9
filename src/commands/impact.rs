use std::io::{self, Write};

use anyhow::{Context, Result};
use finclusion::engine::{
    AssociationEntry, ImpactRow, TimelineEvent, association_entries,
    build_event_indicator_association_matrix, build_impact_matrix,
};
use serde::Serialize;
use tracing::info;

use crate::cli::ImpactArgs;
use crate::commands::load_store;
use crate::util::{default_db_path, print_json};

#[derive(Debug, Serialize)]
struct ImpactResponse {
    indicator_filter: Option<String>,
    impact_rows: Vec<ImpactRow>,
    associations: Vec<AssociationEntry>,
    events: Vec<TimelineEvent>,
}

pub fn run(args: ImpactArgs) -> Result<()> {
    let db_path = default_db_path(&args.cache_root, args.db_path.as_ref());
    let store = load_store(&db_path)?;

    let mut impact_rows = build_impact_matrix(&store).context("failed to build impact matrix")?;
    if let Some(code) = &args.indicator {
        impact_rows.retain(|row| &row.related_indicator == code);
    }
    let associations =
        association_entries(&build_event_indicator_association_matrix(&impact_rows));
    let events = store.events_timeline();

    info!(
        impact_rows = impact_rows.len(),
        associations = associations.len(),
        events = events.len(),
        "impact matrix built"
    );

    let response = ImpactResponse {
        indicator_filter: args.indicator.clone(),
        impact_rows,
        associations,
        events,
    };

    if args.json {
        return print_json(&response);
    }
    write_text_response(&response)
}

fn write_text_response(response: &ImpactResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Events: {}", response.events.len())?;
    for event in &response.events {
        writeln!(
            output,
            "  {}\t{}\t{}\t{}\t{}",
            event.event_date,
            event.event_id,
            event.category.as_deref().unwrap_or("-"),
            event.name.as_deref().unwrap_or("-"),
            event.status.as_deref().unwrap_or("-"),
        )?;
    }

    writeln!(output, "Impact links: {}", response.impact_rows.len())?;
    for row in &response.impact_rows {
        writeln!(
            output,
            "  {}\t{} -> {}\tlands {}\t{:+.2} pp\tlag {}m\tevidence={}",
            row.impact_link_id,
            row.event_id,
            row.related_indicator,
            row.effective_year,
            row.signed_effect,
            row.lag_months,
            row.evidence_basis
                .as_ref()
                .map(|basis| basis.as_str())
                .unwrap_or("-"),
        )?;
    }

    writeln!(output, "Associations: {}", response.associations.len())?;
    for entry in &response.associations {
        writeln!(
            output,
            "  {}\t{}\t{:+.2} pp\tlinks={}",
            entry.event_id, entry.indicator_code, entry.effect, entry.link_count
        )?;
    }

    output.flush()?;
    Ok(())
}
