use content_sync::SyncPlan;
use content_sync_store::SyncRun;

const MAX_NAME_WIDTH: usize = 40;
const LINE_BUDGET: usize = 100;

pub fn print_plan(plan: &SyncPlan) {
    let name_width = plan
        .to_fetch
        .iter()
        .map(|e| e.filename.chars().count())
        .chain(plan.to_delete.iter().map(|r| r.filename.chars().count()))
        .max()
        .unwrap_or(0)
        .min(MAX_NAME_WIDTH);

    if !plan.to_fetch.is_empty() {
        println!("Fetch ({})", plan.to_fetch.len());
        let budget = LINE_BUDGET.saturating_sub(2 + name_width + 2);
        for entry in &plan.to_fetch {
            println!(
                "  {:<width$}  {}",
                truncate(&entry.filename, name_width),
                truncate(entry.source.as_str(), budget),
                width = name_width
            );
        }
    }

    if !plan.to_delete.is_empty() {
        if !plan.to_fetch.is_empty() {
            println!();
        }
        println!("Delete ({})", plan.to_delete.len());
        for record in &plan.to_delete {
            println!(
                "  {:<width$}  {}",
                truncate(&record.filename, name_width),
                format_bytes(record.size_bytes),
                width = name_width
            );
        }
    }
}

pub fn print_runs(runs: &[SyncRun]) {
    for run in runs {
        let outcome = match (run.skip_reason, run.success) {
            (Some(reason), _) => format!("skipped ({})", reason.as_str()),
            (None, true) => "ok".to_owned(),
            (None, false) => "failed".to_owned(),
        };
        println!(
            "{}  {:<28}  {}",
            run.finished_at.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            truncate(&run.message, 60)
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = *next;
    }
    format!("{value:.1} {unit}")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}
