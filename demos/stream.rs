use std::{
    fs::File,
    io,
    thread,
    time::Duration,
};

use futures_util::StreamExt;
use linuxfd::{
    Inotify,
    WatchMask,
};
use tempdir::TempDir;


#[tokio::main]
async fn main() -> Result<(), io::Error> {
    let inotify = Inotify::init()
        .expect("Failed to initialize inotify");

    let dir = TempDir::new("linuxfd-demo")?;

    let mut stream = inotify.into_event_stream([0u8; 32])?;
    stream.watches().add(dir.path(), WatchMask::CREATE | WatchMask::MODIFY)?;

    thread::spawn::<_, Result<(), io::Error>>(move || {
        loop {
            File::create(dir.path().join("file"))?;
            thread::sleep(Duration::from_millis(500));
        }
    });

    while let Some(event) = stream.next().await {
        println!("event: {:?}", event?);
    }

    Ok(())
}
