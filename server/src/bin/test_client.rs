use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use gather_shared::{kind, Envelope, MovePayload, WORLD_HEIGHT, WORLD_WIDTH};
use serde_json::json;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted client for poking a running gather server")]
struct Args {
    /// WebSocket URL of the server
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Name of the player to create
    #[arg(short, long, default_value = "tester")]
    name: String,

    /// Number of moves to send after creating the player
    #[arg(short, long, default_value = "10")]
    moves: u32,
}

fn frame<T: serde::Serialize>(kind: &str, data: &T) -> Result<Message, serde_json::Error> {
    let envelope = Envelope::new(kind, data)?;
    Ok(Message::Text(serde_json::to_string(&envelope)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let (socket, _) = connect_async(args.server.as_str()).await?;
    let (mut write, mut read) = socket.split();

    // Print everything the server sends until it hangs up
    let (created_tx, created_rx) = oneshot::channel();
    let reader = tokio::spawn(async move {
        let mut created_tx = Some(created_tx);
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => {
                        println!("<- {} {}", envelope.kind, envelope.data);
                        if envelope.kind == kind::CREATED {
                            if let (Some(tx), Some(id)) =
                                (created_tx.take(), envelope.data["id"].as_i64())
                            {
                                let _ = tx.send(id);
                            }
                        }
                    }
                    Err(e) => println!("<- unreadable frame ({}): {}", e, text),
                },
                Ok(Message::Close(frame)) => {
                    println!("<- close {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    println!("Error receiving: {}", e);
                    break;
                }
            }
        }
    });

    write.send(frame(kind::GET_PLAYERS, &json!({}))?).await?;
    write
        .send(frame(kind::CREATE, &json!({ "name": args.name }))?)
        .await?;

    let id = match tokio::time::timeout(Duration::from_secs(5), created_rx).await {
        Ok(Ok(id)) => id,
        _ => return Err("server did not confirm player creation".into()),
    };
    println!("Created player {}", id);

    for i in 0..args.moves {
        let angle = i as f32 / 5.0;
        let payload = MovePayload {
            id,
            x: (WORLD_WIDTH as f32 / 2.0 + angle.sin() * 100.0) as i32,
            y: (WORLD_HEIGHT as f32 / 2.0 + angle.cos() * 100.0) as i32,
        };
        println!("-> move {:?}", payload);
        write.send(frame(kind::MOVE, &payload)?).await?;
        sleep(Duration::from_millis(250)).await;
    }

    write.send(Message::Close(None)).await?;
    let _ = tokio::time::timeout(Duration::from_secs(2), reader).await;

    println!("Test client finished");
    Ok(())
}
