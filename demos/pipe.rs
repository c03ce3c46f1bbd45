use lazy_coro::{Generator, Gn};

fn square<'a, T: Iterator<Item = u32> + 'a>(input: T) -> Generator<'a, u32> {
    Gn::new_scoped(|mut s| async move {
        for i in input {
            s.yield_(i * i).await;
        }
    })
}

fn sum<'a, T: Iterator<Item = u32> + 'a>(input: T) -> Generator<'a, u32> {
    Gn::new_scoped(|mut s| async move {
        let mut acc = 0;
        for i in input {
            acc += i;
            s.yield_(acc).await;
        }
    })
}

fn main() {
    for i in sum(square(0..10)).fmap(|v| v * 2) {
        println!("i = {:?}", i);
    }
}
