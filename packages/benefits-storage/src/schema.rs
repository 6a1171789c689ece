/// The full schema with every `\ir` include inlined.
pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		match line.trim().strip_prefix("\\ir ").map(str::trim) {
			Some(path) => out.push_str(include_for(path).unwrap_or(line)),
			None => out.push_str(line),
		}

		out.push('\n');
	}

	out
}

fn include_for(path: &str) -> Option<&'static str> {
	let sql = match path {
		"tables/001_companies.sql" => include_str!("../../../sql/tables/001_companies.sql"),
		"tables/002_users.sql" => include_str!("../../../sql/tables/002_users.sql"),
		"tables/003_benefit_plans.sql" => include_str!("../../../sql/tables/003_benefit_plans.sql"),
		"tables/004_enrollments.sql" => include_str!("../../../sql/tables/004_enrollments.sql"),
		"tables/005_documents.sql" => include_str!("../../../sql/tables/005_documents.sql"),
		"tables/006_document_chunks.sql" =>
			include_str!("../../../sql/tables/006_document_chunks.sql"),
		"tables/007_ingest_outbox.sql" => include_str!("../../../sql/tables/007_ingest_outbox.sql"),
		"tables/008_conversations.sql" => include_str!("../../../sql/tables/008_conversations.sql"),
		"tables/009_messages.sql" => include_str!("../../../sql/tables/009_messages.sql"),
		"tables/010_llm_usage.sql" => include_str!("../../../sql/tables/010_llm_usage.sql"),
		"tables/011_analytics_events.sql" =>
			include_str!("../../../sql/tables/011_analytics_events.sql"),
		"tables/012_audit_log.sql" => include_str!("../../../sql/tables/012_audit_log.sql"),
		_ => return None,
	};

	Some(sql)
}
