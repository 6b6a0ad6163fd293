//! Metrics export
//!
//! Gathers the aggregate statistics into one bundle and renders it as JSON,
//! Markdown, or CSV. The CSV form covers task executions with a fixed header
//! and column order so downstream tooling can rely on it.

use crate::error::{Error, Result};
use crate::format::{format_duration_ms, format_rate};
use crate::store::Store;
use crate::types::{
    AgentTypeStats, BashStats, ErrorPattern, FileStats, SummaryStats, TaskExecution, ToolStats,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::Config(format!(
                "unknown export format {:?} (expected json, markdown, or csv)",
                other
            ))),
        }
    }
}

/// Everything the exporters need, gathered in one pass.
#[derive(Debug, Serialize)]
pub struct MetricsBundle {
    pub generated_at: DateTime<Utc>,
    pub project: Option<String>,
    pub summary: SummaryStats,
    pub tools: Vec<ToolStats>,
    pub bash: Vec<BashStats>,
    pub files: Vec<FileStats>,
    pub errors: Vec<ErrorPattern>,
    pub agents: Vec<AgentTypeStats>,
    pub executions: Vec<TaskExecution>,
}

impl MetricsBundle {
    /// Gather all aggregate views from the store.
    ///
    /// `limit <= 0` exports everything; a positive limit truncates each
    /// ranked table (executions are always exported in full).
    pub fn collect(store: &Store, project: Option<&str>, limit: i64) -> Result<Self> {
        Ok(Self {
            generated_at: Utc::now(),
            project: project.map(str::to_string),
            summary: store.summary_stats(project)?,
            tools: store.tool_stats(project, limit, 0)?,
            bash: store.bash_stats(project, limit, 0)?,
            files: store.file_stats(project, limit, 0)?,
            errors: store.error_patterns(project, limit, 0)?,
            agents: store.agent_type_stats(project, limit, 0)?,
            executions: store.list_executions(project, 0, 0)?,
        })
    }

    /// Render the bundle in the requested format.
    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ExportFormat::Markdown => Ok(self.to_markdown()),
            ExportFormat::Csv => Ok(self.to_csv()),
        }
    }

    fn to_markdown(&self) -> String {
        let mut out = String::new();

        out.push_str("# tracelore metrics\n\n");
        out.push_str(&format!(
            "Generated: {}\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(ref project) = self.project {
            out.push_str(&format!("Project: `{}`\n\n", project));
        }

        out.push_str("## Summary\n\n");
        out.push_str("| Sessions | Events | Success rate | Avg duration | Tokens in | Tokens out | Executions |\n");
        out.push_str("|---|---|---|---|---|---|---|\n");
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n\n",
            self.summary.sessions,
            self.summary.events,
            format_rate(self.summary.success_rate),
            format_duration_ms(self.summary.avg_duration_ms),
            self.summary.tokens_in,
            self.summary.tokens_out,
            self.summary.executions,
        ));

        if !self.tools.is_empty() {
            out.push_str("## Tool usage\n\n");
            out.push_str("| Tool | Calls | OK | Failed | Success rate | Avg duration |\n");
            out.push_str("|---|---|---|---|---|---|\n");
            for t in &self.tools {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} |\n",
                    t.tool_name,
                    t.total_calls,
                    t.successes,
                    t.failures,
                    format_rate(t.success_rate),
                    format_duration_ms(t.avg_duration_ms),
                ));
            }
            out.push('\n');
        }

        if !self.bash.is_empty() {
            out.push_str("## Bash commands\n\n");
            out.push_str("| Command | Runs | OK | Failed | Success rate |\n");
            out.push_str("|---|---|---|---|---|\n");
            for b in &self.bash {
                out.push_str(&format!(
                    "| `{}` | {} | {} | {} | {} |\n",
                    b.command.replace('|', "\\|"),
                    b.total_calls,
                    b.successes,
                    b.failures,
                    format_rate(b.success_rate),
                ));
            }
            out.push('\n');
        }

        if !self.files.is_empty() {
            out.push_str("## File operations\n\n");
            out.push_str("| Path | Operation | Ops | OK | Failed | Bytes |\n");
            out.push_str("|---|---|---|---|---|---|\n");
            for f in &self.files {
                out.push_str(&format!(
                    "| `{}` | {} | {} | {} | {} | {} |\n",
                    f.path,
                    f.operation.as_str(),
                    f.total_ops,
                    f.successes,
                    f.failures,
                    f.total_bytes,
                ));
            }
            out.push('\n');
        }

        if !self.errors.is_empty() {
            out.push_str("## Error patterns\n\n");
            out.push_str("| Kind | Component | Message | Count | Last occurred |\n");
            out.push_str("|---|---|---|---|---|\n");
            for e in &self.errors {
                out.push_str(&format!(
                    "| {} | `{}` | {} | {} | {} |\n",
                    e.kind.as_str(),
                    e.component.replace('|', "\\|"),
                    e.message.replace('|', "\\|"),
                    e.occurrences,
                    e.last_occurred.format("%Y-%m-%d %H:%M:%S"),
                ));
            }
            out.push('\n');
        }

        if !self.agents.is_empty() {
            out.push_str("## Agent performance\n\n");
            out.push_str("| Agent | Tasks | OK | Failed | Success rate | Avg duration (s) |\n");
            out.push_str("|---|---|---|---|---|---|\n");
            for a in &self.agents {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {:.1} |\n",
                    a.agent,
                    a.total_tasks,
                    a.successes,
                    a.failures,
                    format_rate(a.success_rate),
                    a.avg_duration_seconds,
                ));
            }
            out.push('\n');
        }

        out
    }

    fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(
            "id,plan_file,run_number,task_number,task_name,agent,success,error_message,duration_seconds,timestamp\n",
        );
        for exec in &self.executions {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{}\n",
                exec.id,
                csv_escape(&exec.plan_file),
                exec.run_number,
                exec.task_number,
                csv_escape(&exec.task_name),
                csv_escape(&exec.agent),
                exec.success,
                csv_escape(exec.error_message.as_deref().unwrap_or("")),
                exec.duration_seconds,
                exec.created_at.to_rfc3339(),
            ));
        }
        out
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewTaskExecution;
    use std::str::FromStr;

    fn bundle_with_execution() -> MetricsBundle {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
            .record_execution(&NewTaskExecution {
                plan_file: "plans/refactor.md".to_string(),
                run_number: 2,
                task_number: 7,
                task_name: "extract parser, add tests".to_string(),
                agent: "builder".to_string(),
                success: false,
                error_message: Some("tests failed".to_string()),
                duration_seconds: 42.5,
                ..Default::default()
            })
            .unwrap();
        MetricsBundle::collect(&store, None, 0).unwrap()
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(ExportFormat::from_str("json").unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::from_str("md").unwrap(), ExportFormat::Markdown);
        assert_eq!(
            ExportFormat::from_str("Markdown").unwrap(),
            ExportFormat::Markdown
        );
        assert_eq!(ExportFormat::from_str("csv").unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_csv_header_and_row() {
        let bundle = bundle_with_execution();
        let csv = bundle.render(ExportFormat::Csv).unwrap();
        let mut lines = csv.lines();

        assert_eq!(
            lines.next().unwrap(),
            "id,plan_file,run_number,task_number,task_name,agent,success,error_message,duration_seconds,timestamp"
        );

        let row = lines.next().unwrap();
        assert!(row.starts_with("1,plans/refactor.md,2,7,"));
        // The comma in the task name forces quoting
        assert!(row.contains("\"extract parser, add tests\""));
        assert!(row.contains(",false,"));
        assert!(row.contains(",42.5,"));
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_json_round_trips() {
        let bundle = bundle_with_execution();
        let json = bundle.render(ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["summary"]["executions"], 1);
        assert_eq!(parsed["executions"][0]["agent"], "builder");
    }

    #[test]
    fn test_markdown_contains_sections() {
        let bundle = bundle_with_execution();
        let md = bundle.render(ExportFormat::Markdown).unwrap();
        assert!(md.starts_with("# tracelore metrics"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("## Agent performance"));
        assert!(md.contains("| builder |"));
    }
}
