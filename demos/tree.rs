use lazy_coro::{Gn, RecursiveGenerator};

enum Tree {
    Leaf(u32),
    Node(Vec<Tree>),
}

fn walk(t: Tree) -> RecursiveGenerator<'static, u32> {
    Gn::new_recursive(|mut s| async move {
        match t {
            Tree::Leaf(v) => s.yield_(v).await,
            Tree::Node(children) => {
                for c in children {
                    s.yield_from(walk(c)).await;
                }
            }
        }
    })
}

/// a degenerate tree, one node per level
fn spine(depth: u32) -> Tree {
    let mut t = Tree::Leaf(depth);
    for i in (0..depth).rev() {
        t = Tree::Node(vec![Tree::Leaf(i), t]);
    }
    t
}

fn main() {
    let t = Tree::Node(vec![
        Tree::Leaf(1),
        Tree::Node(vec![Tree::Leaf(2), Tree::Leaf(3)]),
        Tree::Leaf(4),
    ]);
    println!("{:?}", walk(t).collect::<Vec<_>>());

    let depth = 100_000;
    let total: u64 = walk(spine(depth)).map(u64::from).sum();
    println!("depth {} sum {}", depth, total);
}
