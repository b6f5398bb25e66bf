//! Line console on stdin: keyword search over the routing table and downloads by result number.

use std::sync::Arc;

use hopshare_core::{ContentId, SearchHit};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::node::Node;

const HELP: &str = "\
commands:
  search [words]   list content whose name matches (all content if no words)
  get <n|id>       download result n of the last search, or a content id
  table            print the routing table
  peers            list live neighbours
  quit             stop the node";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Get(String),
    Table,
    Peers,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let cmd = match word.to_lowercase().as_str() {
        "" => return None,
        "search" | "s" => Command::Search(rest.to_string()),
        "get" | "g" if !rest.is_empty() => Command::Get(rest.to_string()),
        "table" | "t" => Command::Table,
        "peers" | "p" => Command::Peers,
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(cmd)
}

/// Content to fetch for a `get` argument: a result number of the last search, else a raw id.
fn resolve(arg: &str, last: &[SearchHit]) -> ContentId {
    match arg.parse::<usize>() {
        Ok(i) if i < last.len() => last[i].content.clone(),
        _ => ContentId::new(arg),
    }
}

fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "no matches".to_string();
    }
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let Some(best) = hit.paths.first() else {
            continue;
        };
        out.push_str(&format!(
            "[{i}] {} ({} hops, {} path(s)) {}\n",
            best.name,
            best.hop_count,
            hit.paths.len(),
            hit.content
        ));
    }
    out
}

/// Serve stdin until `quit`, end of input, or shutdown. `quit` fires `stop`.
pub async fn run(node: Arc<Node>, stop: watch::Sender<bool>, mut shutdown: watch::Receiver<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last: Vec<SearchHit> = Vec::new();
    println!("{HELP}");
    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };
        let Some(cmd) = parse_command(&line) else {
            continue;
        };
        match cmd {
            Command::Search(query) => {
                last = node.state().search(&query);
                print!("{}", render_hits(&last));
                if last.is_empty() {
                    println!();
                }
            }
            Command::Get(arg) => {
                let content = resolve(&arg, &last);
                match node.dispatcher().request_content(&content) {
                    Ok(request) => {
                        println!("requesting {content}");
                        node.perform(vec![hopshare_core::OutboundAction::SendMessage(request)])
                            .await;
                    }
                    Err(e) => println!("cannot download: {e}"),
                }
            }
            Command::Table => print!("{}", node.state().routing_summary()),
            Command::Peers => {
                for peer in node.state().known_peers() {
                    println!("{peer}");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {
                let _ = stop.send(true);
                break;
            }
            Command::Unknown(line) => println!("unknown command: {line} (try help)"),
        }
    }
}
