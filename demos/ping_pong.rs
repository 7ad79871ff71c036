//! Ping-pong between two typewire endpoints on loopback TCP

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use typewire::protocol::{encode_envelope, read_next};
use typewire::{Client, Envelope, TypeRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    name: String,
    id: i64,
}

fn registry() -> typewire::Result<Arc<TypeRegistry>> {
    let registry = TypeRegistry::new();
    registry.register::<Item>()?;
    Ok(Arc::new(registry))
}

/// Answer every `Item` request with the same item renamed to "pong".
fn serve(mut stream: TcpStream, registry: &TypeRegistry) -> typewire::Result<()> {
    loop {
        let Some(decoded) = read_next(&mut stream, registry)? else {
            continue;
        };
        let Some(envelope) = decoded.downcast_ref::<Envelope>() else {
            continue;
        };
        let Some(inner) = registry.decode(envelope.inner_type_code(), envelope.inner_data().as_bytes())
        else {
            continue;
        };
        if let Some(ping) = inner.downcast_ref::<Item>() {
            println!("server: got {ping:?}");
            let pong = Item {
                name: "pong".into(),
                id: ping.id + 1,
            };
            stream.write_all(&encode_envelope(&pong, registry, envelope.correlation_id())?)?;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Typewire Ping-Pong Example");
    println!("==========================\n");

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server_registry = registry()?;
    thread::spawn(move || -> typewire::Result<()> {
        let (stream, _) = listener.accept()?;
        serve(stream, &server_registry)
    });

    let client = Client::new(TcpStream::connect(addr)?, registry()?)?;
    let (tx, rx) = mpsc::channel();

    client
        .request(&Item {
            name: "ping".into(),
            id: 1,
        })?
        .on_response::<Item, _>(move |pong| {
            let _ = tx.send((*pong).clone());
        });

    let pong = rx.recv_timeout(Duration::from_secs(5))?;
    println!("client: got {pong:?}");
    println!("pending requests: {}", client.pending_len());
    println!("metrics: {:?}", typewire::protocol::metrics::snapshot());

    Ok(())
}
