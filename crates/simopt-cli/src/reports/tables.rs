use comfy_table::presets::ASCII_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use simopt_core::case::VariableKind;
use simopt_core::config::Config;
use simopt_core::model::VariableContainer;
use simopt_core::runner::RunSummary;
use strum::IntoEnumIterator;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn variables(model: &VariableContainer, filter: Option<&str>) {
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Variable").add_attribute(Attribute::Bold),
        Cell::new("Kind"),
        Cell::new("Initial").fg(Color::Cyan),
    ]);
    if let Some(col) = table.column_mut(2) {
        col.set_cell_alignment(CellAlignment::Right);
    }

    let needle = filter.map(str::to_lowercase);
    let mut shown = 0;
    for var in model.iter() {
        if let Some(n) = &needle {
            if !var.name.to_lowercase().contains(n) {
                continue;
            }
        }
        table.add_row(vec![
            Cell::new(&var.name).add_attribute(Attribute::Bold),
            Cell::new(var.kind().to_string()),
            Cell::new(var.value.to_string()).fg(Color::Cyan),
        ]);
        shown += 1;
    }

    println!("{}", table);
    let counts: Vec<String> = VariableKind::iter()
        .map(|kind| {
            let n = model.iter().filter(|v| v.kind() == kind).count();
            format!("{} {}", n, kind)
        })
        .collect();
    println!("{} of {} variables shown ({})", shown, model.len(), counts.join(", "));
}

pub fn config(config: &Config) {
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Setting").add_attribute(Attribute::Bold),
        Cell::new("Value"),
    ]);

    let rt = &config.runtime;
    let s = &config.search;
    let rows: [(&str, String); 11] = [
        ("direction", s.direction.to_string()),
        ("max_evaluations", s.max_evaluations.to_string()),
        ("initial_step_length", s.initial_step_length.to_string()),
        ("minimum_step_length", s.minimum_step_length.to_string()),
        ("contraction_factor", s.contraction_factor.to_string()),
        ("bookkeeper_tolerance", rt.bookkeeper_tolerance.to_string()),
        ("simulator_delay_ms", rt.simulator_delay_ms.to_string()),
        ("simulation_timeout", rt.simulation_timeout.to_string()),
        ("sentinel_value", rt.sentinel_value.to_string()),
        (
            "case_log",
            rt.case_log
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "realizations",
            if rt.realizations.is_empty() {
                "-".to_string()
            } else {
                rt.realizations.join(", ")
            },
        ),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    println!("{}", table);
}

pub fn run_summary(title: &str, summary: &RunSummary) {
    println!("\n🏁 === {} === 🏁", title.to_uppercase());

    let mut stats = new_table();
    stats.add_row(vec![
        Cell::new("Simulated").fg(Color::Green),
        Cell::new("Bookkept"),
        Cell::new("Invalid").fg(Color::Red),
        Cell::new("Timed out").fg(Color::Red),
        Cell::new("Iterations"),
        Cell::new("Termination").add_attribute(Attribute::Bold),
    ]);
    stats.add_row(vec![
        Cell::new(summary.stats.simulated),
        Cell::new(summary.stats.bookkept),
        Cell::new(summary.stats.invalid),
        Cell::new(summary.stats.timed_out),
        Cell::new(summary.iterations),
        Cell::new(summary.termination.to_string()).add_attribute(Attribute::Bold),
    ]);
    println!("{}", stats);

    let Some(best) = summary.best_objective() else {
        println!("No case produced an objective value.");
        return;
    };
    println!("Best objective: {}", best);

    let mut vars = new_table();
    vars.add_row(vec![
        Cell::new("Variable").add_attribute(Attribute::Bold),
        Cell::new("Best value").fg(Color::Cyan),
    ]);
    for (name, value) in &summary.best_variables {
        vars.add_row(vec![
            Cell::new(name),
            Cell::new(value.to_string()).fg(Color::Cyan),
        ]);
    }
    if let Some(col) = vars.column_mut(1) {
        col.set_cell_alignment(CellAlignment::Right);
    }
    println!("{}", vars);
}
