use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::TrayError;
use crate::model::ForwardPorts;
use crate::settings::TerminalPreferences;
use crate::surface::{Notifier, UiSurface};
use crate::switcher::SwitchOutcome;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConsoleEvent {
    Refresh,
    CloseDetail(String),
    Warning { title: String, message: String },
}

/// Menu redraw requests, queued for the console loop.
#[derive(Clone)]
pub struct ConsoleSurface {
    events: UnboundedSender<ConsoleEvent>,
}

impl UiSurface for ConsoleSurface {
    fn refresh(&self) {
        let _ = self.events.send(ConsoleEvent::Refresh);
    }

    fn close_detail_view(&self, pod: &str) {
        let _ = self.events.send(ConsoleEvent::CloseDetail(pod.to_string()));
    }
}

#[derive(Clone)]
pub struct ConsoleNotifier {
    events: UnboundedSender<ConsoleEvent>,
}

impl Notifier for ConsoleNotifier {
    fn warn(&self, title: &str, message: &str) {
        warn!("{title}: {message}");
        let _ = self.events.send(ConsoleEvent::Warning {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

pub fn console_channel() -> (ConsoleSurface, ConsoleNotifier, UnboundedReceiver<ConsoleEvent>) {
    let (events, receiver) = unbounded_channel();
    (
        ConsoleSurface {
            events: events.clone(),
        },
        ConsoleNotifier { events },
        receiver,
    )
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConsoleCommand {
    Menu,
    UseContext(String),
    UseNamespace(String),
    Open(String),
    Close,
    Forward(String),
    StopForward(String),
    Ports {
        pod: String,
        source: String,
        target: String,
    },
    SourcePort {
        pod: String,
        port: String,
    },
    TargetPort {
        pod: String,
        port: String,
    },
    Shell {
        pod: String,
        container: Option<String>,
    },
    Logs {
        pod: String,
        container: Option<String>,
    },
    Refresh(RefreshTarget),
    ShowPreferences,
    SavePreferences(TerminalPreferences),
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RefreshTarget {
    All,
    Contexts,
    Namespaces,
    Pods,
}

/// Parses one input line. Errors are ready-to-print usage hints.
pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Err("No command entered".to_string());
    };
    let args = parts.map(str::to_string).collect::<Vec<_>>();

    match (command.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("q" | "quit" | "exit", _) => Ok(ConsoleCommand::Quit),
        ("h" | "help" | "?", _) => Ok(ConsoleCommand::Help),
        ("r" | "refresh" | "reload", []) => Ok(ConsoleCommand::Refresh(RefreshTarget::All)),
        ("r" | "refresh" | "reload", [target]) => match target.as_str() {
            "contexts" => Ok(ConsoleCommand::Refresh(RefreshTarget::Contexts)),
            "namespaces" => Ok(ConsoleCommand::Refresh(RefreshTarget::Namespaces)),
            "pods" => Ok(ConsoleCommand::Refresh(RefreshTarget::Pods)),
            _ => Err("Usage: refresh [contexts|namespaces|pods]".to_string()),
        },
        ("r" | "refresh" | "reload", _) => {
            Err("Usage: refresh [contexts|namespaces|pods]".to_string())
        }
        ("m" | "menu" | "ls" | "pods" | "contexts" | "namespaces", []) => {
            Ok(ConsoleCommand::Menu)
        }
        ("ctx" | "context" | "use-context", [name]) => {
            Ok(ConsoleCommand::UseContext(name.clone()))
        }
        ("ctx" | "context" | "use-context", _) => Err("Usage: ctx <context-name>".to_string()),
        ("ns" | "namespace", [name]) => Ok(ConsoleCommand::UseNamespace(name.clone())),
        ("ns" | "namespace", _) => Err("Usage: ns <namespace>".to_string()),
        ("open" | "o" | "describe", [pod]) => Ok(ConsoleCommand::Open(pod.clone())),
        ("open" | "o" | "describe", _) => Err("Usage: open <pod>".to_string()),
        ("close", _) => Ok(ConsoleCommand::Close),
        ("pf" | "port-forward", [action, pod]) => match action.as_str() {
            "start" => Ok(ConsoleCommand::Forward(pod.clone())),
            "stop" => Ok(ConsoleCommand::StopForward(pod.clone())),
            _ => Err("Usage: pf <start|stop> <pod>".to_string()),
        },
        ("pf" | "port-forward", _) => Err("Usage: pf <start|stop> <pod>".to_string()),
        ("ports", [pod, mapping]) => match mapping.split_once(':') {
            Some((source, target)) => Ok(ConsoleCommand::Ports {
                pod: pod.clone(),
                source: source.to_string(),
                target: target.to_string(),
            }),
            None => Err("Usage: ports <pod> <from:to>".to_string()),
        },
        ("ports", [pod, source, target]) => Ok(ConsoleCommand::Ports {
            pod: pod.clone(),
            source: source.clone(),
            target: target.clone(),
        }),
        ("ports", _) => Err("Usage: ports <pod> <from:to>".to_string()),
        ("from", [pod, port]) => Ok(ConsoleCommand::SourcePort {
            pod: pod.clone(),
            port: port.clone(),
        }),
        ("from", _) => Err("Usage: from <pod> <local-port>".to_string()),
        ("to", [pod, port]) => Ok(ConsoleCommand::TargetPort {
            pod: pod.clone(),
            port: port.clone(),
        }),
        ("to", _) => Err("Usage: to <pod> <pod-port>".to_string()),
        ("ssh" | "shell" | "exec", [pod, rest @ ..]) if rest.len() <= 1 => {
            Ok(ConsoleCommand::Shell {
                pod: pod.clone(),
                container: rest.first().cloned(),
            })
        }
        ("ssh" | "shell" | "exec", _) => Err("Usage: ssh <pod> [container]".to_string()),
        ("logs" | "log", [pod, rest @ ..]) if rest.len() <= 1 => {
            Ok(ConsoleCommand::Logs {
                pod: pod.clone(),
                container: rest.first().cloned(),
            })
        }
        ("logs" | "log", _) => Err("Usage: logs <pod> [container]".to_string()),
        ("prefs" | "settings", []) => Ok(ConsoleCommand::ShowPreferences),
        ("prefs" | "settings", [width, height, tail]) => {
            Ok(ConsoleCommand::SavePreferences(TerminalPreferences {
                width: width.clone(),
                height: height.clone(),
                tail: tail.clone(),
            }))
        }
        ("prefs" | "settings", _) => Err("Usage: prefs [<width> <height> <tail>]".to_string()),
        (other, _) => Err(format!("Unknown command '{other}', try 'help'")),
    }
}

pub const HELP: &str = "\
commands:
  menu                      show contexts, namespaces and pods
  ctx <name>                switch kubectl context
  ns <name>                 switch namespace of the current context
  open <pod> / close        show pod details and watch the pod
  ports <pod> <from:to>     save port-forward ports
  from|to <pod> <port>      save only the local or the pod port
  pf start|stop <pod>       start or stop a port-forward
  ssh <pod> [container]     open a shell in a terminal window
  logs <pod> [container]    follow logs in a terminal window
  prefs [<w> <h> <tail>]    show or save terminal preferences
  refresh [what]            reload everything, or contexts|namespaces|pods
  quit";

/// Snapshot of the tray menu as text.
pub fn render_menu(engine: &Engine) -> String {
    let store = engine.store();
    let mut out = String::new();

    let context = store
        .current_context()
        .map(|context| context.name)
        .unwrap_or_default();
    let _ = writeln!(out, "Context: {context}");
    for context in store.contexts() {
        let marker = if context.in_use { "*" } else { " " };
        let _ = writeln!(out, "  {marker} {}", context.name);
    }

    let namespace = store
        .current_namespace()
        .map(|namespace| namespace.name)
        .unwrap_or_default();
    let _ = writeln!(out, "Namespace: {namespace}");
    for namespace in store.namespaces() {
        let marker = if namespace.in_use { "*" } else { " " };
        let _ = writeln!(out, "  {marker} {}", namespace.name);
    }

    let now = Utc::now();
    let watcher = engine.watcher();
    let watching = if watcher.is_running() { "" } else { " (not watching)" };
    let _ = writeln!(out, "Pods:{watching}");
    let open = watcher.open_pod();
    for pod in store.pods() {
        let forwarding = engine
            .sessions()
            .session(&pod.name)
            .map(|session| format!("  -> {}", session.ports))
            .unwrap_or_default();
        let view = match open.as_deref() {
            Some(name) if name == pod.name && watcher.has_pending_close(name) => "  [closing]",
            Some(name) if name == pod.name => "  [open]",
            _ => "",
        };
        let _ = writeln!(
            out,
            "    {} {} {} {} {}{forwarding}{view}",
            pod.name,
            pod.ready,
            pod.status,
            pod.restarts,
            pod.age_label(now)
        );
    }

    let sessions = engine.sessions().sessions();
    if !sessions.is_empty() {
        let _ = writeln!(out, "Port Forwarding:");
        for session in sessions {
            let _ = writeln!(out, "    {} {}", session.pod_name, session.ports);
        }
    }
    out
}

pub enum Step {
    Continue(String),
    Quit,
}

pub async fn execute(engine: &Engine, command: ConsoleCommand) -> Step {
    let message = match command {
        ConsoleCommand::Quit => return Step::Quit,
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Menu => render_menu(engine),
        ConsoleCommand::Refresh(target) => {
            let (what, result) = match target {
                RefreshTarget::All => ("everything", engine.refresh_all().await),
                RefreshTarget::Contexts => ("contexts", engine.store().refresh_contexts().await),
                RefreshTarget::Namespaces => {
                    ("namespaces", engine.store().refresh_namespaces().await)
                }
                RefreshTarget::Pods => ("pods", engine.store().refresh_pods().await),
            };
            match result {
                Ok(()) => format!("Refreshed {what}"),
                Err(error) => format!("Refresh incomplete: {error}"),
            }
        }
        ConsoleCommand::UseContext(name) => {
            switch_message("context", &name, engine.switch_context(&name).await)
        }
        ConsoleCommand::UseNamespace(name) => {
            switch_message("namespace", &name, engine.switch_namespace(&name).await)
        }
        ConsoleCommand::Open(name) => match engine.open_pod(&name).await {
            Ok(pod) => {
                let mut out = format!("{}\n", pod.summary());
                for container in &pod.containers {
                    let ready = if container.ready { "ready" } else { "not ready" };
                    let _ = writeln!(out, "  {} {} ({ready})", container.name, container.image);
                }
                let ports = engine.sessions().ports(&name);
                let _ = write!(out, "  ports: {ports}");
                if engine.sessions().is_forwarding(&name) {
                    out.push_str(" (forwarding)");
                }
                out
            }
            Err(error) => error.to_string(),
        },
        ConsoleCommand::Close => {
            engine.close_pod();
            "Closed pod view".to_string()
        }
        ConsoleCommand::Forward(pod) => match engine.start_forward(&pod) {
            Ok(session) => format!("Forwarding {pod} {}", session.ports),
            Err(error) => error.to_string(),
        },
        ConsoleCommand::StopForward(pod) => {
            if engine.stop_forward(&pod) {
                format!("Stopped port-forward for {pod}")
            } else {
                format!("No port-forward running for {pod}")
            }
        }
        ConsoleCommand::Ports {
            pod,
            source,
            target,
        } => {
            let stopped = engine.set_ports(&pod, &source, &target);
            if stopped {
                format!("Saved {source}:{target} for {pod}, running port-forward stopped")
            } else {
                format!("Saved {source}:{target} for {pod}")
            }
        }
        ConsoleCommand::SourcePort { pod, port } => {
            let stopped = engine.sessions().set_source_port(&pod, &port);
            port_message(&pod, engine.sessions().ports(&pod), stopped)
        }
        ConsoleCommand::TargetPort { pod, port } => {
            let stopped = engine.sessions().set_target_port(&pod, &port);
            port_message(&pod, engine.sessions().ports(&pod), stopped)
        }
        ConsoleCommand::Shell { pod, container } => {
            match container_for(engine, &pod, container).await {
                Ok(container) => {
                    engine.open_shell(&pod, &container);
                    format!("Opening shell in {pod}/{container}")
                }
                Err(error) => error.to_string(),
            }
        }
        ConsoleCommand::Logs { pod, container } => {
            match container_for(engine, &pod, container).await {
                Ok(container) => {
                    engine.open_logs(&pod, &container);
                    format!("Opening logs of {pod}/{container}")
                }
                Err(error) => error.to_string(),
            }
        }
        ConsoleCommand::ShowPreferences => {
            let preferences = engine.preferences();
            format!(
                "Terminal {} tail {}",
                preferences.geometry(),
                preferences.tail
            )
        }
        ConsoleCommand::SavePreferences(preferences) => {
            match engine.save_preferences(&preferences) {
                Ok(()) => "Preferences saved".to_string(),
                Err(error) => format!("{error:#}"),
            }
        }
    };
    Step::Continue(message)
}

fn port_message(pod: &str, ports: ForwardPorts, stopped: bool) -> String {
    if stopped {
        format!("Ports for {pod} now {ports}, running port-forward stopped")
    } else {
        format!("Ports for {pod} now {ports}")
    }
}

fn switch_message(
    kind: &str,
    name: &str,
    result: Result<SwitchOutcome, TrayError>,
) -> String {
    match result {
        Ok(SwitchOutcome::Applied) => format!("Switched {kind} to '{name}'"),
        Ok(SwitchOutcome::AlreadyActive) => format!("'{name}' is already the active {kind}"),
        Err(error) => error.to_string(),
    }
}

/// Falls back to the pod's first container.
async fn container_for(
    engine: &Engine,
    pod: &str,
    container: Option<String>,
) -> Result<String, TrayError> {
    if let Some(container) = container {
        return Ok(container);
    }
    let pod = match engine.store().pod(pod) {
        Some(known) if known.has_details() => known,
        _ => engine.store().describe_pod(pod).await?,
    };
    pod.containers
        .into_iter()
        .next()
        .map(|container| container.name)
        .ok_or_else(|| TrayError::parse("get pod", format!("{} has no containers", pod.name)))
}

/// Reads commands from stdin and prints menu redraws and warnings until
/// `quit` or end of input.
pub async fn run_console(
    engine: Arc<Engine>,
    mut events: UnboundedReceiver<ConsoleEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => match execute(&engine, command).await {
                        Step::Continue(message) => println!("{message}"),
                        Step::Quit => break,
                    },
                    Err(usage) => println!("{usage}"),
                }
            }
            Some(event) = events.recv() => {
                // Coalesce bursts into a single redraw.
                let mut redraw = false;
                let queued = std::iter::from_fn(|| events.try_recv().ok());
                for event in std::iter::once(event).chain(queued) {
                    match event {
                        ConsoleEvent::Refresh => redraw = true,
                        ConsoleEvent::CloseDetail(pod) => {
                            println!("{pod} is gone, closed its view");
                        }
                        ConsoleEvent::Warning { title, message } => {
                            println!("! {title}: {message}");
                        }
                    }
                }
                if redraw {
                    print!("{}", render_menu(&engine));
                }
            }
        }
    }

    engine.shutdown();
    Ok(())
}
