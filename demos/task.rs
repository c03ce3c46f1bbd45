use std::thread;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::block_on;
use lazy_coro::Task;

fn fetch(v: u32) -> Task<u32> {
    Task::new(async move {
        let (tx, rx) = oneshot::channel();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let _ = tx.send(v);
        });
        rx.await.unwrap_or_default()
    })
}

fn main() {
    let total = Task::new(async {
        let mut acc = 0;
        for i in 1..=5 {
            acc += fetch(i).await;
        }
        acc
    });
    println!("total = {}", block_on(total));

    let mut lazy = fetch(7);
    println!("ready before await: {}", lazy.is_ready());
    block_on(lazy.when_ready());
    println!("ready after when_ready: {}", lazy.is_ready());
    println!("value = {}", block_on(lazy));
}
