//! Console report: boxed single-column tables of addresses.

/// Render `header` and `rows` as an ASCII box table.
pub fn table(header: &str, rows: &[String]) -> String {
    let width = rows
        .iter()
        .map(|r| r.chars().count())
        .chain(std::iter::once(header.chars().count()))
        .max()
        .unwrap_or(0);
    let rule = format!("+{}+", "-".repeat(width + 2));
    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!("| {:<width$} |\n", header));
    out.push_str(&rule);
    out.push('\n');
    for row in rows {
        out.push_str(&format!("| {:<width$} |\n", row));
    }
    if !rows.is_empty() {
        out.push_str(&rule);
        out.push('\n');
    }
    out
}

/// Both report tables; connected addresses are sorted.
pub fn report(own: &[String], mut connected: Vec<String>) -> String {
    connected.sort();
    let own_table = table("Node's own addresses:", own);
    let conn_table = table(
        &format!("Node is connected to {} peers:", connected.len()),
        &connected,
    );
    format!("\n{}\n\n{}", own_table, conn_table)
}
