use lazy_coro::Gn;

fn main() {
    let g = Gn::new_scoped(|mut s| async move {
        let (mut a, mut b) = (0u64, 1u64);
        while b < 200 {
            std::mem::swap(&mut a, &mut b);
            b += a;
            s.yield_(b).await;
        }
    });

    for i in g {
        println!("{}", i);
    }

    // the same sequence through the cursor api
    let mut g1 = Gn::new_scoped(|mut s| async move {
        let (mut a, mut b) = (0u64, 1u64);
        loop {
            s.yield_(a).await;
            (a, b) = (b, a + b);
        }
    });

    let mut it = g1.begin();
    for _ in 0..10 {
        if let Some(v) = it.get() {
            print!("{} ", v);
        }
        it.advance();
    }
    println!();
}
