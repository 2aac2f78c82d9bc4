use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use lina_shared::{ChatMessage, MessageStatus, Role};
use lina_envoy::client::ApiClient;
use lina_envoy::config::Config;
use lina_envoy::connectivity::{ConnectivityMonitor, Reconnects};
use lina_envoy::messenger::{Messenger, SendOutcome};
use lina_envoy::offline_queue::{OfflineQueue, QueueProgress};
use lina_envoy::session::TokenRefreshMonitor;

const HISTORY_ON_START: u32 = 20;

pub async fn interactive_chat(config: &Config, client: ApiClient, queue: Arc<OfflineQueue>) -> Result<()> {
    println!("HeyLina chat started. Type 'quit' to exit.\n");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_monitor = Arc::new(TokenRefreshMonitor::new(
        client.session().clone(),
        Arc::new(client.clone()),
    ));
    let refresh_handle = {
        let monitor = refresh_monitor.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    let connectivity = Arc::new(ConnectivityMonitor::new(Arc::new(client.clone())));
    if !connectivity.check_now().await {
        println!("(offline: messages will be sent when HeyLina is reachable again)\n");
    }
    let connectivity_handle = {
        let monitor = connectivity.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    let mut reconnects = Reconnects::new(connectivity.subscribe());
    let mut messenger = Messenger::new(client, queue.clone(), config.retry_config())
        .with_connectivity(connectivity.clone());

    if connectivity.is_online() {
        match messenger.load_history(HISTORY_ON_START).await {
            Ok(_) => {
                for message in messenger.thread().messages() {
                    print_message(message);
                }
                if !messenger.thread().is_empty() {
                    println!();
                }
            }
            Err(e) => eprintln!("{}\n", e.friendly_message()),
        }
        drain_queued(&mut messenger, &queue).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = reconnects.next() => {
                println!();
                drain_queued(&mut messenger, &queue).await;
                continue;
            }
        };
        let Some(input) = line else {
            break;
        };
        let input = input.trim();

        if input.eq_ignore_ascii_case("quit") {
            break;
        }

        if input.is_empty() {
            continue;
        }

        println!();

        let outcome = messenger.send(input).await;
        for reply in messenger.take_drained() {
            print_message(&reply);
        }
        match outcome {
            SendOutcome::Delivered { reply } => {
                print_message(&reply);
                println!();
            }
            SendOutcome::Queued { queued, .. } => {
                println!("(offline: message saved, {} waiting to send)\n", queued);
            }
            SendOutcome::Failed(e) => {
                eprintln!("⚠ {}\n", e.friendly_message());
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = refresh_handle.await;
    let _ = connectivity_handle.await;

    if !queue.is_empty() {
        println!("{} message(s) still waiting to send. Run `envoy flush` when you're back online.", queue.len());
    }
    println!("Goodbye!");
    Ok(())
}

pub async fn single_message(config: &Config, client: ApiClient, queue: Arc<OfflineQueue>, message: String) -> Result<()> {
    let mut messenger = Messenger::new(client, queue, config.retry_config());

    let outcome = messenger.send(&message).await;
    for reply in messenger.take_drained() {
        print_message(&reply);
    }
    match outcome {
        SendOutcome::Delivered { reply } => print_message(&reply),
        SendOutcome::Queued { queued, .. } => {
            println!("Offline: message saved ({} waiting). Run `envoy flush` later.", queued);
        }
        SendOutcome::Failed(e) => eprintln!("⚠ {}", e.friendly_message()),
    }
    Ok(())
}

pub async fn show_history(client: &ApiClient, limit: u32, offset: u32) -> Result<()> {
    match client.list_messages(limit, offset).await {
        Ok(page) if page.messages.is_empty() => println!("No messages yet."),
        Ok(page) => page.messages.iter().for_each(print_message),
        Err(e) => eprintln!("⚠ {}", e.friendly_message()),
    }
    Ok(())
}

pub fn show_queue(queue: &OfflineQueue) {
    let items = queue.snapshot();
    if items.is_empty() {
        println!("Nothing waiting to send.");
        return;
    }

    println!("{} message(s) waiting to send:", items.len());
    for item in items {
        println!(
            "  [{}] {} (retries: {})",
            item.timestamp.format("%Y-%m-%d %H:%M"),
            item.content,
            item.retry_count
        );
    }
}

pub async fn flush_queue(config: &Config, client: ApiClient, queue: Arc<OfflineQueue>) -> Result<()> {
    if queue.is_empty() {
        println!("Nothing waiting to send.");
        return Ok(());
    }

    if let Err(e) = client.health().await {
        eprintln!("⚠ {}", e.friendly_message());
        return Ok(());
    }

    let mut messenger = Messenger::new(client, queue, config.retry_config());
    match messenger.flush_queue(print_progress).await {
        Ok(flush) => {
            flush.replies.iter().for_each(print_message);
            println!(
                "Sent {}, dropped {}, {} still waiting.",
                flush.queue.sent, flush.queue.dropped, flush.queue.remaining
            );
        }
        Err(e) => eprintln!("⚠ {}", e.friendly_message()),
    }
    Ok(())
}

/// Send what the offline queue holds and show Lina's replies.
async fn drain_queued(messenger: &mut Messenger, queue: &OfflineQueue) {
    if queue.is_empty() {
        return;
    }
    match messenger.flush_queue(print_progress).await {
        Ok(flush) => {
            for reply in &flush.replies {
                print_message(reply);
            }
            if flush.queue.remaining > 0 {
                println!("({} message(s) still waiting to send)", flush.queue.remaining);
            }
            println!();
        }
        Err(e) => eprintln!("⚠ {}\n", e.friendly_message()),
    }
}

fn print_progress(progress: QueueProgress) {
    println!("\n✓ Sent queued message {}/{}", progress.sent, progress.total);
}

fn print_message(message: &ChatMessage) {
    let speaker = match message.role {
        Role::User => "You",
        Role::Assistant => "Lina",
    };
    let marker = match message.status {
        MessageStatus::Pending => " (sending…)",
        MessageStatus::Failed => " (failed)",
        MessageStatus::Sent => "",
    };
    println!("{}: {}{}", speaker, message.content, marker);
}
