//! Peerstat Node binary
//!
//! Joins the TCP mesh and drives the dashboard from line commands on stdin.

use peerstat_metrics::{Rect, Viewport};
use peerstat_node::dashboard::{self, ENTER_KEY};
use peerstat_node::{Node, NodeConfig, NodeHandle, RenderFn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "commands: type <store> <text> | enter <store> | focus <store> | \
view <store> | hide <store> | scroll | show | peers | quit";

/// Chart box used for simulated visibility checks.
const CHART: Rect = Rect::new(0.0, 0.0, 300.0, 400.0);
const ON_SCREEN: Viewport = Viewport::new(800.0, 600.0);
const OFF_SCREEN: Viewport = Viewport::new(0.0, 0.0);

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Type { store: String, text: String },
    Enter(String),
    Focus(String),
    View(String),
    Hide(String),
    Scroll,
    Show,
    Peers,
    Quit,
}

fn parse(line: &str) -> Option<Input> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let store = || (!rest.is_empty()).then(|| rest.to_string());

    match verb {
        "type" => {
            let (store, text) = rest.split_once(' ')?;
            Some(Input::Type {
                store: store.to_string(),
                text: text.to_string(),
            })
        }
        "enter" => store().map(Input::Enter),
        "focus" => store().map(Input::Focus),
        "view" => store().map(Input::View),
        "hide" => store().map(Input::Hide),
        "scroll" => Some(Input::Scroll),
        "show" => Some(Input::Show),
        "peers" => Some(Input::Peers),
        "quit" | "exit" => Some(Input::Quit),
        _ => None,
    }
}

async fn dispatch(handle: &NodeHandle, input: Input) -> peerstat_node::Result<bool> {
    match input {
        Input::Type { store, text } => handle.text_field_change(&store, text)?,
        Input::Enter(store) => handle.key_up(&store, ENTER_KEY)?,
        Input::Focus(store) => handle.focus(&store)?,
        Input::View(store) => handle.visibility_check(&store, CHART, ON_SCREEN)?,
        Input::Hide(store) => handle.visibility_check(&store, CHART, OFF_SCREEN)?,
        Input::Scroll => handle.scroll()?,
        Input::Show => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Input::Peers => {
            let stats = handle.stats().await?;
            println!("{}", serde_json::to_string(&stats)?);
        }
        Input::Quit => {
            handle.shutdown()?;
            return Ok(false);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerstat_node=info,peerstat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Peerstat Node");

    let config = NodeConfig::from_env()?;
    let transport = Arc::new(config.tcp_transport());
    let render: RenderFn = Box::new(|state| {
        tracing::debug!("Dashboard:\n{}", dashboard::render_text(state));
    });

    let (node, handle) = Node::new(config, transport, render)?;
    let task = tokio::spawn(node.run());

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(input) = parse(&line) else {
            println!("{HELP}");
            continue;
        };
        match dispatch(&handle, input).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::error!("{}", e);
                break;
            }
        }
    }

    // Stdin closed without quit.
    let _ = handle.shutdown();
    task.await??;
    Ok(())
}
