//! Basic usage example for the net-link codecs.

use bytes::Bytes;
use link_wire::{ByteProtocol, Codec, JsonProtocol, Protocol};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Student {
    name: String,
    age: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== net-link Codec Example ===\n");

    // 1. Byte codec over an in-memory pipe
    println!("1. Byte codec...");
    let (a, b) = tokio::io::duplex(1024);
    let left = ByteProtocol::new().codec_for(a)?;
    let right = ByteProtocol::new().codec_for(b)?;

    left.write(&Bytes::from_static(&[1, 2, 3, 4, 5])).await?;

    let mut buf = [0u8; 5];
    right.read(&mut buf).await?;
    println!("   Received bytes: {:?}", buf);

    // 2. Hijack the raw stream underneath a codec
    println!("\n2. Hijacked stream...");
    right.hijack().write_all(&[2, 3, 4]).await?;

    let mut reply = [0u8; 3];
    left.read(&mut reply).await?;
    println!("   Raw reply: {:?}", reply);

    // 3. JSON codec, one document per line
    println!("\n3. JSON codec...");
    let (a, b) = tokio::io::duplex(1024);
    let sender = JsonProtocol::<Student>::new().codec_for(a)?;
    let receiver = JsonProtocol::<Student>::new().codec_for(b)?;

    sender
        .write(&Student {
            name: "foobar".to_string(),
            age: 999,
        })
        .await?;

    let mut student = Student::default();
    receiver.read(&mut student).await?;
    println!("   Decoded: {:?}", student);

    // 4. End of stream is reported distinctly
    println!("\n4. Closing...");
    sender.close().await?;
    let err = receiver.read(&mut student).await.unwrap_err();
    println!("   After peer close: {} (eof: {})", err, err.is_eof());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
