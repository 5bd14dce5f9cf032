use std::env;

use linuxfd::{
    EventMask,
    Inotify,
    WatchMask,
};


fn main() {
    let mut inotify = Inotify::init()
        .expect("Failed to initialize inotify");

    let current_dir = env::current_dir()
        .expect("Failed to determine current directory");

    inotify
        .watches()
        .add(
            current_dir,
            WatchMask::MODIFY | WatchMask::CREATE | WatchMask::DELETE,
        )
        .expect("Failed to add inotify watch");

    println!("Watching current directory for activity...");

    let mut buffer = [0u8; 4096];
    loop {
        let events = inotify
            .read_events_blocking(&mut buffer)
            .expect("Failed to read inotify events");

        for event in events {
            let kind = if event.mask.contains(EventMask::ISDIR) {
                "Directory"
            } else {
                "File"
            };

            if event.mask.contains(EventMask::CREATE) {
                println!("{} created: {:?}", kind, event.name);
            } else if event.mask.contains(EventMask::DELETE) {
                println!("{} deleted: {:?}", kind, event.name);
            } else if event.mask.contains(EventMask::MODIFY) {
                println!("{} modified: {:?}", kind, event.name);
            } else {
                println!("{:?}: {:?}", event.mask.names(), event.name);
            }
        }
    }
}
