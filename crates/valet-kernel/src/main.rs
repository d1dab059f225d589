//! valet-kernel: assemble and run the assistant daemon.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use valet_agents::{AgentLoader, AgentRunner, BackgroundTaskManager, Orchestrator};
use valet_approval::{DenyAllApprover, PermissionManager};
use valet_audit::AuditLog;
use valet_config::Settings;
use valet_core::short_hex_id;
use valet_kernel::{ChatService, SessionManager, WebhookState};
use valet_llm::{LlmRouter, ToolCall};
use valet_notify::{FileMonitor, NotificationDispatcher};
use valet_scheduler::{
    JobStore, SchedulerManager, WorkflowManager, WorkflowRunner, WorkflowToolExecutor,
    register_schedule_reminder_tool,
};
use valet_tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();

    let filter = EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(version = env!("CARGO_PKG_VERSION"), "valet kernel starting");

    std::fs::create_dir_all(&settings.data_dir)?;

    // Core plumbing: audit, permissions, tools, LLM routing.
    //
    // The daemon itself is headless, so the default approver denies
    // anything that needs a human; transports supply their own approver
    // per request, and background agents run with auto-approve.
    let audit = Arc::new(AuditLog::new(settings.audit_log_path())?);
    let permissions = Arc::new(PermissionManager::new(Arc::new(DenyAllApprover)));
    let registry = Arc::new(
        ToolRegistry::new(Arc::clone(&permissions), Arc::clone(&audit))
            .with_workspace_root(&settings.data_dir),
    );
    let router = Arc::new(LlmRouter::new(settings.clone()));

    // Notifications.
    let dispatcher = Arc::new(NotificationDispatcher::new(
        settings.dnd_enabled,
        &settings.dnd_start,
        &settings.dnd_end,
        settings.dnd_allow_urgent,
    ));

    // Sessions and the chat service.
    let sessions = Arc::new(SessionManager::new());
    let chat = Arc::new(ChatService::new(
        settings.clone(),
        Arc::clone(&router),
        Arc::clone(&registry),
        Arc::clone(&sessions),
    ));

    // Agents and delegation tools.
    if settings.agents_enabled {
        let loader = Arc::new(AgentLoader::new(settings.agents_dir()));
        loader.load_all();
        let runner = Arc::new(AgentRunner::new(
            Arc::clone(&router),
            Arc::clone(&registry),
        ));
        let background = Arc::new(BackgroundTaskManager::new());
        let orchestrator = Arc::new(Orchestrator::new(loader, runner, Some(background)));
        orchestrator.register_tools(&registry).await;
    }

    // Workflow system. Steps execute through the registry, so permission
    // gating and audit apply to workflow steps as to any tool call.
    let workflow_manager = Arc::new(WorkflowManager::new(settings.workflow_dir()));
    workflow_manager.load();
    let workflow_executor: WorkflowToolExecutor = {
        let registry = Arc::clone(&registry);
        Arc::new(move |tool: String, args: Value| {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                let call = ToolCall::new(format!("wf_{}", short_hex_id(8)), tool, args);
                let result = registry.execute(&call, "workflow", None).await;
                if result.is_error {
                    Err(anyhow::anyhow!(result.content))
                } else {
                    Ok(result.content)
                }
            })
        })
    };
    let workflow_runner = Arc::new(WorkflowRunner::new().with_executor(workflow_executor));

    // Scheduler.
    let scheduler = if settings.scheduler_enabled {
        let store = JobStore::open(settings.scheduler_db_path())?;
        let scheduler = Arc::new(
            SchedulerManager::new(store, Arc::clone(&dispatcher), &settings.scheduler_timezone)
                .with_assistant(Arc::clone(&chat) as _)
                .with_workflows(Arc::clone(&workflow_manager), Arc::clone(&workflow_runner)),
        );
        scheduler.start()?;
        register_schedule_reminder_tool(&registry, Arc::clone(&scheduler)).await;
        Some(scheduler)
    } else {
        None
    };

    // Filesystem watchdog.
    let monitor = if settings.watchdog_enabled {
        let monitor = Arc::new(FileMonitor::new(
            Arc::clone(&dispatcher),
            settings.watchdog_debounce_seconds,
            settings.watchdog_analyze,
        ));
        if let Err(e) = monitor.start() {
            warn!(error = %e, "file monitor failed to start");
        }
        for path in &settings.watchdog_paths {
            monitor.add_path(path);
        }
        Some(monitor)
    } else {
        None
    };

    // HTTP surface.
    let webhooks = settings.webhook_enabled.then(|| {
        Arc::new(WebhookState {
            secret: settings.webhook_secret.clone(),
            workflows: Some((Arc::clone(&workflow_manager), Arc::clone(&workflow_runner))),
            dispatcher: Arc::clone(&dispatcher),
        })
    });
    let app = valet_kernel::server::build_app(webhooks);

    valet_kernel::server::serve(app, &settings.host, settings.port, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    // Orderly shutdown.
    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    router.close().await;
    info!("valet kernel stopped");
    Ok(())
}
