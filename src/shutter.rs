use chrono::{DateTime, Local};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::process::Command;
use std::thread::JoinHandle;

/// Emitted the moment a still has been produced
#[derive(Debug, Clone, PartialEq)]
pub struct ShutterEvent {
    pub side: u32,
    pub at: DateTime<Local>,
}

/// Start the shutter sound player. It runs until every sender is dropped.
pub fn spawn(sound: Option<PathBuf>) -> (Sender<ShutterEvent>, JoinHandle<()>) {
    let (sender, receiver) = unbounded();
    let handle = std::thread::spawn(move || run(receiver, sound));
    (sender, handle)
}

fn run(receiver: Receiver<ShutterEvent>, sound: Option<PathBuf>) {
    for event in receiver.iter() {
        log::info!("📸 Shutter at {} ({}px still)", event.at.format("%H:%M:%S%.3f"), event.side);

        let Some(path) = sound.as_ref() else {
            continue;
        };
        // A missing player only costs the sound
        match Command::new("aplay").arg("-q").arg(path).spawn() {
            Ok(mut child) => {
                log::debug!("Playing shutter sound {}", path.display());
                let _ = child.wait();
            }
            Err(e) => log::warn!("Could not play shutter sound {}: {}", path.display(), e),
        }
    }
    log::debug!("Shutter player stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_exits_when_senders_drop() {
        let (sender, handle) = spawn(None);
        sender
            .send(ShutterEvent { side: 640, at: Local::now() })
            .unwrap();
        drop(sender);
        handle.join().unwrap();
    }
}
