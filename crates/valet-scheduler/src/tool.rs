//! The `schedule_reminder` tool exposed to the LLM.

use serde_json::{Value, json};
use std::sync::Arc;

use valet_approval::ActionCategory;
use valet_tools::{ToolHandler, ToolRegistry};

use crate::manager::SchedulerManager;

/// Register the `schedule_reminder` tool against a scheduler instance.
///
/// Actions: `create` (default) schedules a reminder, `list` shows persisted
/// jobs, `cancel` removes one by id.
pub async fn register_schedule_reminder_tool(
    registry: &ToolRegistry,
    scheduler: Arc<SchedulerManager>,
) {
    registry
        .register(
            "schedule_reminder",
            "Schedule a reminder or recurring notification. Use trigger_type 'date' for \
             one-time reminders (provide run_date in ISO format), 'cron' for recurring \
             (provide cron fields like hour, minute, day_of_week), or 'interval' for \
             periodic (provide seconds, minutes, or hours). Use action 'list' to see \
             reminders and 'cancel' with a job_id to remove one.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["create", "list", "cancel"],
                        "description": "What to do; defaults to create",
                        "default": "create",
                    },
                    "description": {
                        "type": "string",
                        "description": "Human-readable description of the reminder",
                    },
                    "trigger_type": {
                        "type": "string",
                        "enum": ["date", "cron", "interval"],
                        "description": "Type of trigger",
                    },
                    "trigger_args": {
                        "type": "object",
                        "description": "Trigger arguments. For 'date': {run_date: ISO \
                            datetime}. For 'cron': {hour, minute, day_of_week, etc}. For \
                            'interval': {seconds, minutes, or hours}.",
                    },
                    "message": {
                        "type": "string",
                        "description": "The reminder message to send",
                    },
                    "job_id": {
                        "type": "string",
                        "description": "Job id to cancel",
                    },
                },
                "required": [],
            }),
            ActionCategory::Write,
            schedule_reminder_handler(scheduler),
        )
        .await;
}

fn schedule_reminder_handler(scheduler: Arc<SchedulerManager>) -> ToolHandler {
    Arc::new(move |input: Value| {
        let scheduler = Arc::clone(&scheduler);
        Box::pin(async move {
            let action = input
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("create");

            match action {
                "list" => {
                    let jobs = scheduler.list_jobs()?;
                    if jobs.is_empty() {
                        return Ok("No reminders scheduled.".to_string());
                    }
                    let lines: Vec<String> = jobs
                        .iter()
                        .map(|j| {
                            format!(
                                "- {} [{}] {}({})",
                                j.id, j.description, j.trigger_type, j.trigger_args
                            )
                        })
                        .collect();
                    Ok(lines.join("\n"))
                },
                "cancel" => {
                    let job_id = input
                        .get("job_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if scheduler.remove_job(job_id) {
                        Ok(format!("Cancelled reminder {job_id}."))
                    } else {
                        Ok(format!("No reminder found with ID: {job_id}"))
                    }
                },
                _ => {
                    let description = input
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let trigger_type = input
                        .get("trigger_type")
                        .and_then(Value::as_str)
                        .unwrap_or("date");
                    let trigger_args = input.get("trigger_args").cloned().unwrap_or(json!({}));
                    let message = input.get("message").and_then(Value::as_str);

                    let job_id = scheduler.add_reminder(
                        description,
                        trigger_type,
                        trigger_args,
                        message,
                    )?;
                    Ok(format!("Reminder scheduled with ID: {job_id}"))
                },
            }
        })
    })
}
