//! Hypothesis prefix trie.
//!
//! Every node except the root stands for extending its parent by one
//! non-blank emission. Nodes live in a per-utterance arena and refer to each
//! other by index; the arena is dropped whole when the utterance finishes,
//! so deprecation is only a soft-delete flag and no physical removal ever
//! happens inside a timestep.

use rustfst::StateId;

use crate::search::logmath::{log_diff_exp, log_sum_exp};

pub(crate) const ROOT_ID: i32 = -1;

pub(crate) type NodeId = usize;

/// One vertex of the prefix trie.
///
/// `*_prob` fields are linear-scale accumulators for the current timestep;
/// `*_score` fields are natural-log scale. `0.0` in a score field means "no
/// contribution yet", not `log(1)`; `update_score` special-cases it.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub id: i32,
    pub token: String,
    pub is_clone: bool,
    /// The parent-path score of this node must be derived from the parent's
    /// blank-preceded previous score, not the parent's overall score.
    pub only_prev_b: bool,

    pub is_lex_path: bool,
    pub is_start_of_word: bool,
    pub is_hotpath: bool,
    pub is_at_writer: bool,
    pub is_deprecated: bool,

    /// Timestep the emitted symbol is attributed to (most confident so far).
    pub ts: i32,
    /// Timestep blank mass was last committed into this node.
    pub b_ts: i32,
    /// Timestep non-blank mass was last committed into this node.
    pub tk_ts: i32,

    pub tk_prob: f64,
    pub b_prob: f64,
    pub prev_b_score: f64,
    pub squash_score: f64,
    pub prev_score: f64,
    pub max_prob: f64,
    /// A more confident emission observed this timestep; promoted to
    /// `max_prob` (possibly splitting the node) at score-update time.
    pub pending_max_prob: f64,
    /// Parent score captured when this node last synchronized with it.
    pub p_score: f64,
    pub score: f64,
    /// `score + lm_lex_score + hw_score`; the ranking key.
    pub ovrl_score: f64,
    /// Cumulative LM + lexicon contribution, inherited by children.
    pub lm_lex_score: f64,
    /// Hotword bonus for this extension only; never inherited.
    pub hw_score: f64,

    pub parent: Option<NodeId>,
    pub lm_state: Option<StateId>,
    pub lexicon_state: Option<StateId>,
    pub hotword_state: Option<StateId>,

    pub children: Vec<NodeId>,
    /// For clones: the node whose child list is consulted in addition to
    /// our own. The source stays readable after deprecation because live
    /// nodes keep borrowing its descendants within the timestep.
    pub source: Option<NodeId>,
}

#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    nodes: Vec<Node>,
}

impl std::ops::Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl std::ops::IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
}

impl NodeArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub fn new_root(&mut self) -> NodeId {
        self.alloc(Node {
            id: ROOT_ID,
            token: "<s>".to_string(),
            is_clone: false,
            only_prev_b: false,
            is_lex_path: true,
            is_start_of_word: false,
            is_hotpath: false,
            is_at_writer: false,
            is_deprecated: false,
            ts: -1,
            b_ts: -1,
            tk_ts: -1,
            tk_prob: 0.0,
            b_prob: 0.0,
            prev_b_score: 0.0,
            squash_score: 0.0,
            prev_score: 0.0,
            max_prob: 0.0,
            pending_max_prob: 0.0,
            p_score: 0.0,
            score: 0.0,
            ovrl_score: 0.0,
            lm_lex_score: 0.0,
            hw_score: 0.0,
            parent: None,
            lm_state: None,
            lexicon_state: None,
            hotword_state: None,
            children: Vec::new(),
            source: None,
        })
    }

    /// Fresh child of `parent` for one observation of `id` at `ts`.
    ///
    /// With `only_prev_b` the parent-path score comes from the parent's
    /// blank-preceded previous score: the extension is only valid along
    /// alignments where the repeat was separated by a blank.
    pub fn new_child(
        &mut self,
        id: i32,
        ts: i32,
        prob: f64,
        token: &str,
        parent: NodeId,
        only_prev_b: bool,
    ) -> NodeId {
        let p = &self.nodes[parent];
        let lm_lex_score = p.lm_lex_score;
        let p_score = if only_prev_b {
            p.prev_score + p.prev_b_score
        } else {
            p.score
        };
        self.alloc(Node {
            id,
            token: token.to_string(),
            is_clone: false,
            only_prev_b,
            is_lex_path: true,
            is_start_of_word: false,
            is_hotpath: false,
            is_at_writer: false,
            is_deprecated: false,
            ts,
            b_ts: -1,
            tk_ts: ts,
            tk_prob: prob,
            b_prob: 0.0,
            prev_b_score: 0.0,
            squash_score: 0.0,
            prev_score: 0.0,
            max_prob: prob,
            pending_max_prob: prob,
            p_score,
            score: p_score,
            ovrl_score: 0.0,
            lm_lex_score,
            hw_score: 0.0,
            parent: Some(parent),
            lm_state: None,
            lexicon_state: None,
            hotword_state: None,
            children: Vec::new(),
            source: None,
        })
    }

    /// Clone of `reference` re-parented under `parent`, used when the match
    /// found through a clone's source list still has descendants of its own
    /// and cannot simply be transferred. Deprecates the reference; the clone
    /// keeps borrowing its child list through `source`.
    fn new_clone_of(&mut self, parent: NodeId, reference: NodeId) -> NodeId {
        let mut node = self.nodes[reference].clone();
        node.is_clone = true;
        node.is_deprecated = false;
        // inserted into the writer right after construction
        node.is_at_writer = true;
        node.parent = Some(parent);
        node.children = Vec::new();
        node.source = Some(reference);
        self.nodes[reference].is_deprecated = true;
        self.alloc(node)
    }

    /// Copy used by the more-confident-repeat split: same parent, same
    /// score state, child list borrowed from the original through `source`.
    /// Appends itself to the parent's child list.
    fn new_repeat_split(&mut self, of: NodeId) -> NodeId {
        let mut node = self.nodes[of].clone();
        node.is_clone = true;
        node.is_deprecated = false;
        node.children = Vec::new();
        node.source = Some(of);
        let id = self.alloc(node);
        let parent = self.nodes[of].parent.expect("split never runs on the root");
        self.nodes[parent].children.push(id);
        id
    }

    fn find_child(&self, node: NodeId, id: i32) -> Option<NodeId> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].id == id && !self.nodes[c].is_deprecated)
    }

    fn find_source_child(&self, node: NodeId, id: i32) -> Option<NodeId> {
        let source = self.nodes[node].source?;
        self.nodes[source]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].id == id && !self.nodes[c].is_deprecated)
    }

    /// Add one observation of token `id` at timestep `ts` onto `node`.
    ///
    /// Returns the newly created child when a genuine path extension
    /// happened (the caller then runs external scoring on it); `None` when
    /// the mass was accumulated into an existing node or a clone absorbed
    /// the extension.
    pub fn extend_path(
        &mut self,
        node: NodeId,
        id: i32,
        ts: i32,
        prob: f64,
        token: &str,
        writer: &mut Vec<NodeId>,
        reader: &mut Vec<NodeId>,
    ) -> Option<NodeId> {
        if id == self.nodes[node].id {
            return self.acc_repeat_token_prob(node, ts, prob, writer, reader);
        }

        if let Some(child) = self.find_child(node, id) {
            // The parent's committed score may have moved since this child
            // captured it; the accumulator re-synchronizes.
            self.acc_tk_and_parent_prob(child, prob, writer);
            return None;
        }

        if self.nodes[node].is_clone {
            if let Some(r_node) = self.find_source_child(node, id) {
                self.adopt_source_child(node, ts, prob, r_node, writer, reader);
                return None;
            }
        }

        let child = self.new_child(id, ts, prob, token, node, false);
        self.nodes[node].children.push(child);
        writer.push(child);
        self.nodes[child].is_at_writer = true;
        Some(child)
    }

    /// Repeat of this node's own symbol. The CTC rule: a repeat collapses
    /// into the standing emission unless a blank separates the two, in
    /// which case it is a fresh emission. When blank and token last landed
    /// on the same timestep, both readings are live and both fire.
    fn acc_repeat_token_prob(
        &mut self,
        node: NodeId,
        ts: i32,
        prob: f64,
        writer: &mut Vec<NodeId>,
        reader: &mut Vec<NodeId>,
    ) -> Option<NodeId> {
        let (tk_ts, b_ts) = {
            let n = &self.nodes[node];
            (n.tk_ts, n.b_ts)
        };

        if tk_ts >= b_ts {
            self.acc_prob(node, prob, writer);
        }

        if b_ts >= tk_ts {
            let id = self.nodes[node].id;
            if let Some(child) = self.find_child(node, id) {
                self.acc_tk_and_parent_prob(child, prob, writer);
                return None;
            }

            if self.nodes[node].is_clone {
                if let Some(r_node) = self.find_source_child(node, id) {
                    self.adopt_source_child(node, ts, prob, r_node, writer, reader);
                    return None;
                }
            }

            let token = self.nodes[node].token.clone();
            let child = self.new_child(id, ts, prob, &token, node, true);
            self.nodes[node].children.push(child);
            writer.push(child);
            self.nodes[child].is_at_writer = true;
            return Some(child);
        }

        None
    }

    /// A clone extending along a token whose matching child belongs to its
    /// source. Childless matches are transferred outright; matches with
    /// descendants are cloned so the source's subtree stays intact for
    /// whoever still references it this timestep.
    fn adopt_source_child(
        &mut self,
        node: NodeId,
        ts: i32,
        prob: f64,
        r_node: NodeId,
        writer: &mut Vec<NodeId>,
        reader: &mut Vec<NodeId>,
    ) {
        let child;
        if self.nodes[r_node].children.is_empty() {
            child = r_node;
            self.nodes[child].parent = Some(node);
            if !self.nodes[child].is_at_writer {
                writer.push(child);
                self.nodes[child].is_at_writer = true;
            }
            let source = self.nodes[node].source.expect("adopting node is a clone");
            let list = &mut self.nodes[source].children;
            if let Some(pos) = list.iter().position(|&c| c == r_node) {
                list.swap_remove(pos);
            }
        } else {
            child = self.new_clone_of(node, r_node);
            for slot in reader.iter_mut() {
                if *slot == r_node {
                    *slot = child;
                }
            }
            if self.nodes[r_node].is_at_writer {
                for slot in writer.iter_mut() {
                    if *slot == r_node {
                        *slot = child;
                    }
                }
            } else {
                writer.push(child);
            }
        }

        self.acc_tk_and_parent_prob(child, prob, writer);

        // First sight of the token at this timestep refreshes the clone's
        // attribution; later sightings only compete on confidence.
        let node_ts = self.nodes[node].ts;
        let c = &mut self.nodes[child];
        if c.ts <= node_ts {
            c.ts = ts;
            c.tk_ts = ts;
            c.max_prob = prob;
            c.pending_max_prob = prob;
        } else if prob > c.max_prob {
            c.pending_max_prob = prob;
        }

        self.nodes[node].children.push(child);
    }

    fn acc_prob(&mut self, node: NodeId, prob: f64, writer: &mut Vec<NodeId>) {
        if !self.nodes[node].is_at_writer {
            writer.push(node);
            self.nodes[node].is_at_writer = true;
        }

        let n = &mut self.nodes[node];
        if prob > n.max_prob {
            n.pending_max_prob = prob;
        }
        n.tk_prob = prob;
    }

    fn acc_tk_and_parent_prob(&mut self, node: NodeId, prob: f64, writer: &mut Vec<NodeId>) {
        if !self.nodes[node].is_at_writer {
            writer.push(node);
            self.nodes[node].is_at_writer = true;
        }

        let parent = self.nodes[node].parent.expect("accumulation never runs on the root");
        let (parent_score, parent_prev, parent_prev_b) = {
            let p = &self.nodes[parent];
            (p.score, p.prev_score, p.prev_b_score)
        };

        let n = &mut self.nodes[node];
        if prob > n.max_prob {
            n.pending_max_prob = prob;
        }

        // Exact equality is intentional: `p_score` is a bitwise snapshot of
        // the parent's score, and any committed change to it must reroute
        // this extension's mass through `squash_score`.
        #[allow(clippy::float_cmp)]
        if !n.only_prev_b && parent_score == n.p_score {
            n.tk_prob = prob;
        } else if n.only_prev_b {
            let p_score = parent_prev + parent_prev_b;
            if n.p_score != p_score {
                n.p_score = p_score;
                n.squash_score = p_score + prob.ln();
            } else {
                n.tk_prob = prob;
            }
        } else {
            n.p_score = parent_score;
            n.squash_score = parent_score + prob.ln();
        }
    }

    /// End-of-timestep commit. Runs once per writer node after every token
    /// of the timestep has been observed; the update order is load-bearing.
    ///
    /// A node whose symbol was re-observed more confidently and that
    /// already has descendants is split: the split takes the new timestep
    /// attribution, the original is deprecated and its slower subtree kept.
    pub fn update_score(
        &mut self,
        node: NodeId,
        curr_ts: i32,
        more_confident_repeats: &mut Vec<NodeId>,
    ) -> f64 {
        if self.nodes[node].pending_max_prob > self.nodes[node].max_prob {
            if !self.nodes[node].children.is_empty() {
                let split = self.new_repeat_split(node);
                more_confident_repeats.push(split);

                {
                    let s = &mut self.nodes[split];
                    s.tk_prob = s.pending_max_prob;
                    s.max_prob = s.pending_max_prob;
                    s.ts = curr_ts;
                }
                {
                    let n = &mut self.nodes[node];
                    n.pending_max_prob = n.max_prob;
                    n.squash_score = 0.0;
                    n.is_at_writer = false;
                    n.is_deprecated = true;
                }

                return self.update_score(split, curr_ts, more_confident_repeats);
            }

            let n = &mut self.nodes[node];
            n.tk_prob = n.pending_max_prob;
            n.max_prob = n.pending_max_prob;
            n.ts = curr_ts;
        }

        let n = &mut self.nodes[node];
        let prev_score = n.score;
        n.score = prev_score + (n.tk_prob + n.b_prob).ln();

        if n.prev_b_score != 0.0 && n.tk_prob != 0.0 {
            // Mass that went blank-then-same-token already lives in the
            // blank-preceded child; remove the double count.
            n.score = log_diff_exp(n.score, n.prev_score + n.prev_b_score + n.tk_prob.ln());
        }
        if n.squash_score != 0.0 {
            n.score = log_sum_exp(n.score, n.squash_score);
            n.squash_score = 0.0;
        }

        n.ovrl_score = n.score + n.lm_lex_score + n.hw_score;
        n.prev_score = prev_score;

        if n.tk_prob != 0.0 {
            n.tk_ts = curr_ts;
            n.tk_prob = 0.0;
        }
        if n.b_prob != 0.0 {
            n.b_ts = curr_ts;
            n.prev_b_score = n.b_prob.ln();
            n.b_prob = 0.0;
        } else {
            n.prev_b_score = 0.0;
        }

        n.is_at_writer = false;
        n.ovrl_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_root() -> (NodeArena, NodeId) {
        let mut arena = NodeArena::with_capacity(16);
        let root = arena.new_root();
        (arena, root)
    }

    #[test]
    fn fresh_child_takes_parent_score_and_inherited_scorer_mass() {
        let (mut arena, root) = arena_with_root();
        arena[root].score = 0.6f64.ln();
        arena[root].lm_lex_score = -1.5;

        let child = arena.new_child(2, 3, 0.4, "b", root, false);
        assert_eq!(arena[child].p_score, 0.6f64.ln());
        assert_eq!(arena[child].score, 0.6f64.ln());
        assert_eq!(arena[child].lm_lex_score, -1.5);
        assert_eq!(arena[child].hw_score, 0.0);
        assert_eq!(arena[child].tk_ts, 3);
        assert_eq!(arena[child].b_ts, -1);
    }

    #[test]
    fn blank_preceded_child_takes_parent_blank_mass() {
        let (mut arena, root) = arena_with_root();
        arena[root].prev_score = 0.8f64.ln();
        arena[root].prev_b_score = 0.1f64.ln();
        arena[root].score = 0.85f64.ln();

        let child = arena.new_child(2, 5, 0.3, "b", root, true);
        let expected = 0.8f64.ln() + 0.1f64.ln();
        assert!((arena[child].p_score - expected).abs() < 1e-12);
        assert!((arena[child].score - expected).abs() < 1e-12);
    }

    #[test]
    fn repeat_collapses_when_token_is_most_recent() {
        let (mut arena, root) = arena_with_root();
        let node = arena.new_child(2, 0, 0.9, "b", root, false);
        arena[root].children.push(node);
        arena[node].tk_ts = 0;
        arena[node].b_ts = -1;

        let mut writer = Vec::new();
        let mut reader = vec![node];
        let created = arena.extend_path(node, 2, 1, 0.5, "b", &mut writer, &mut reader);

        assert!(created.is_none());
        assert_eq!(arena[node].tk_prob, 0.5);
        assert!(arena[node].children.is_empty());
        assert_eq!(writer, vec![node]);
    }

    #[test]
    fn repeat_extends_when_blank_is_most_recent() {
        let (mut arena, root) = arena_with_root();
        let node = arena.new_child(2, 0, 0.9, "b", root, false);
        arena[root].children.push(node);
        arena[node].tk_ts = 0;
        arena[node].b_ts = 1;
        arena[node].prev_score = 0.9f64.ln();
        arena[node].prev_b_score = 0.2f64.ln();

        let mut writer = Vec::new();
        let mut reader = vec![node];
        let created = arena
            .extend_path(node, 2, 2, 0.5, "b", &mut writer, &mut reader)
            .expect("blank-separated repeat extends the path");

        assert!(arena[created].only_prev_b);
        assert!((arena[created].p_score - (0.9f64.ln() + 0.2f64.ln())).abs() < 1e-12);
        // the collapsed reading did not fire
        assert_eq!(arena[node].tk_prob, 0.0);
        assert_eq!(writer, vec![created]);
    }

    #[test]
    fn repeat_fires_both_readings_on_tied_timesteps() {
        let (mut arena, root) = arena_with_root();
        let node = arena.new_child(2, 0, 0.9, "b", root, false);
        arena[root].children.push(node);
        arena[node].tk_ts = 1;
        arena[node].b_ts = 1;

        let mut writer = Vec::new();
        let mut reader = vec![node];
        let created = arena.extend_path(node, 2, 2, 0.5, "b", &mut writer, &mut reader);

        assert_eq!(arena[node].tk_prob, 0.5);
        assert!(created.is_some());
        assert_eq!(writer.len(), 2);
    }

    #[test]
    fn more_confident_repeat_updates_in_place_when_childless() {
        let (mut arena, root) = arena_with_root();
        let node = arena.new_child(2, 0, 0.3, "b", root, false);
        arena[node].score = 0.3f64.ln();

        let mut writer = Vec::new();
        arena.acc_prob(node, 0.7, &mut writer);
        assert_eq!(arena[node].pending_max_prob, 0.7);

        let mut repeats = Vec::new();
        arena.update_score(node, 4, &mut repeats);
        assert!(repeats.is_empty());
        assert_eq!(arena[node].max_prob, 0.7);
        assert_eq!(arena[node].ts, 4);
    }

    #[test]
    fn more_confident_repeat_splits_when_descendants_exist() {
        let (mut arena, root) = arena_with_root();
        let node = arena.new_child(2, 0, 0.3, "b", root, false);
        arena[root].children.push(node);
        arena[node].score = 0.3f64.ln();
        let grandchild = arena.new_child(1, 1, 0.2, "'", node, false);
        arena[node].children.push(grandchild);

        let mut writer = Vec::new();
        arena.acc_prob(node, 0.7, &mut writer);

        let mut repeats = Vec::new();
        arena.update_score(node, 4, &mut repeats);

        assert_eq!(repeats.len(), 1);
        let split = repeats[0];
        assert!(arena[node].is_deprecated);
        assert!(!arena[split].is_deprecated);
        assert!(arena[split].is_clone);
        assert_eq!(arena[split].source, Some(node));
        assert_eq!(arena[split].ts, 4);
        assert_eq!(arena[split].max_prob, 0.7);
        // the slower subtree stays reachable through the source
        assert_eq!(arena[node].children, vec![grandchild]);
        // the split joined the parent's child list
        assert!(arena[root].children.contains(&split));
    }

    #[test]
    fn parent_drift_reroutes_mass_through_squash() {
        let (mut arena, root) = arena_with_root();
        arena[root].score = 0.5f64.ln();
        let node = arena.new_child(2, 0, 0.3, "b", root, false);
        arena[root].children.push(node);

        // parent commits a new score after the child captured it
        arena[root].score = 0.2f64.ln();

        let mut writer = Vec::new();
        arena.acc_tk_and_parent_prob(node, 0.4, &mut writer);

        assert_eq!(arena[node].p_score, 0.2f64.ln());
        assert!((arena[node].squash_score - (0.2f64.ln() + 0.4f64.ln())).abs() < 1e-12);
        // the linear accumulator was left alone
        assert_eq!(arena[node].tk_prob, 0.3);
    }
}
