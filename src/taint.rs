//! Error propagation graph.
//!
//! Every stream object in this engine (reader, writer, window, datasheet,
//! tmpfile) owns a [`Taint`]: a handle onto a node in a directed propagation
//! graph. Marking a node tainted taints every node reachable from it and
//! marks every node that can reach it "successor-tainted". A caller can
//! therefore wire up a pipeline, ignore individual operation results, and
//! ask one node at the end whether anything anywhere went wrong.
//!
//! Handles are reference counted: cloning a `Taint` yields another handle on
//! the *same* node. When the last handle on a node drops, the node rewires
//! its predecessors directly to its successors, so reachability between the
//! surviving nodes is preserved.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

struct Node {
    tainted: bool,
    successor_tainted: bool,
    handles: usize,
    succ: Vec<Rc<RefCell<Node>>>,
    pred: Vec<Weak<RefCell<Node>>>,
}

/// A handle on one node in the taint graph.
pub struct Taint {
    node: Rc<RefCell<Node>>,
}

impl Taint {
    /// Creates a fresh, untainted node with no edges.
    pub fn new() -> Self {
        Taint {
            node: Rc::new(RefCell::new(Node {
                tainted: false,
                successor_tainted: false,
                handles: 1,
                succ: Vec::new(),
                pred: Vec::new(),
            })),
        }
    }

    /// Adds a propagation edge from `self` to `to`: if `self` becomes
    /// tainted, so does `to`. Idempotent; self-edges are ignored.
    pub fn propagate(&self, to: &Taint) {
        if Rc::ptr_eq(&self.node, &to.node) {
            return;
        }
        add_edge(&self.node, &to.node);
        if self.node.borrow().tainted {
            set_taint_node(&to.node);
        } else if to.node.borrow().successor_tainted {
            mark_successor_taint(&self.node);
        }
    }

    /// Marks this node tainted, tainting all transitive successors and
    /// successor-tainting all transitive predecessors.
    pub fn set_taint(&self) {
        set_taint_node(&self.node);
    }

    pub fn is_tainted(&self) -> bool {
        self.node.borrow().tainted
    }

    /// Whether a node downstream of this one was or is tainted. The flag
    /// outlives the downstream node itself.
    pub fn has_tainted_successor(&self) -> bool {
        self.node.borrow().successor_tainted
    }

    /// Clears the successor-taint flag, but only if none of the immediate
    /// successors still carry it. Does not recurse into predecessors; call
    /// bottom-up to reset a whole chain.
    pub fn reset_successor_taint(&self) {
        let any = self
            .node
            .borrow()
            .succ
            .iter()
            .any(|s| s.borrow().successor_tainted);
        if !any {
            self.node.borrow_mut().successor_tainted = false;
        }
    }

    /// Drops this handle, reporting whether the node was tainted. Handy for
    /// "destroy the resource, return whether it ever failed" idioms.
    pub fn destroy(self) -> bool {
        self.is_tainted()
    }

    /// Whether two handles refer to the same node.
    pub fn same_node(&self, other: &Taint) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl Default for Taint {
    fn default() -> Self {
        Taint::new()
    }
}

impl Clone for Taint {
    fn clone(&self) -> Self {
        self.node.borrow_mut().handles += 1;
        Taint {
            node: Rc::clone(&self.node),
        }
    }
}

impl Drop for Taint {
    fn drop(&mut self) {
        let (preds, succs) = {
            let mut n = self.node.borrow_mut();
            n.handles -= 1;
            if n.handles > 0 {
                return;
            }
            let preds: Vec<Rc<RefCell<Node>>> =
                n.pred.drain(..).filter_map(|w| w.upgrade()).collect();
            let succs: Vec<Rc<RefCell<Node>>> = n.succ.drain(..).collect();
            (preds, succs)
        };

        // Unlink, then short-circuit predecessors to successors so that
        // pairwise reachability between survivors is preserved.
        for p in &preds {
            p.borrow_mut().succ.retain(|s| !Rc::ptr_eq(s, &self.node));
        }
        for s in &succs {
            s.borrow_mut().pred.retain(|w| match w.upgrade() {
                Some(rc) => !Rc::ptr_eq(&rc, &self.node),
                None => false,
            });
        }
        for p in &preds {
            for s in &succs {
                add_edge(p, s);
            }
        }
    }
}

fn add_edge(from: &Rc<RefCell<Node>>, to: &Rc<RefCell<Node>>) {
    if Rc::ptr_eq(from, to) {
        return;
    }
    let present = from.borrow().succ.iter().any(|s| Rc::ptr_eq(s, to));
    if !present {
        from.borrow_mut().succ.push(Rc::clone(to));
        to.borrow_mut().pred.push(Rc::downgrade(from));
    }
}

fn set_taint_node(node: &Rc<RefCell<Node>>) {
    if node.borrow().tainted {
        return;
    }
    node.borrow_mut().tainted = true;
    let succ: Vec<Rc<RefCell<Node>>> = node.borrow().succ.clone();
    for s in &succ {
        set_taint_node(s);
    }
    mark_successor_taint(node);
}

fn mark_successor_taint(node: &Rc<RefCell<Node>>) {
    if node.borrow().successor_tainted {
        return;
    }
    node.borrow_mut().successor_tainted = true;
    let preds: Vec<Rc<RefCell<Node>>> = node
        .borrow()
        .pred
        .iter()
        .filter_map(|w| w.upgrade())
        .collect();
    for p in &preds {
        mark_successor_taint(p);
    }
}
