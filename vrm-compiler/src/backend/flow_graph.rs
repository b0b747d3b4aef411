//! Basic-block graph construction from structured commands.
//!
//! Blocks live in an arena and refer to each other by id, so loop back
//! edges are plain indices rather than ownership cycles. Straight-line
//! commands accumulate in the current block; `IF`/`WHILE`/`REPEAT` attach
//! a condition and grow `left`/`right` children. The `left` child is the
//! fall-through (then) path of the condition, `right` the branch-taken
//! path — an else branch or the continuation.
//!
//! `jump_to_block` and `jump_to_condition` mark the unconditional jump
//! emitted after the whole subtree rooted at the carrying block: forward
//! to an if/else join, or backward to a loop's test. Line numbers stay
//! unresolved here; the code generator stamps them during its traversal.

use super::instruction::{Instr, Reg};
use crate::ast::{Command, Condition};

pub type BlockId = usize;

#[derive(Debug, Default)]
pub struct Block {
    /// Straight-line commands handled in order.
    pub commands: Vec<Command>,
    pub cond: Option<Condition>,
    /// Fall-through successor of the condition (the then path).
    pub left: Option<BlockId>,
    /// Branch-taken successor (else path, or the continuation).
    pub right: Option<BlockId>,
    /// Unconditional forward edge, emitted after this block's subtree.
    pub jump_to_block: Option<BlockId>,
    /// Backward edge to a loop condition, emitted after this subtree.
    pub jump_to_condition: Option<BlockId>,
    /// This block is an if/else merge point: the path falling through
    /// into it must spill before its first line.
    pub join_spill: bool,
    /// Absolute line of this block's first instruction; set exactly once,
    /// on first traversal visit.
    pub start_line: Option<u64>,
    /// Absolute line of the condition test, the target of back edges.
    pub condition_start_line: Option<u64>,
    /// Emitted instructions, in final textual order.
    pub code: Vec<Instr>,
    /// Registers fixed for the condition between prepare and generate.
    pub prepared: Vec<Reg>,
}

#[derive(Debug, Default)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> BlockId {
        self.blocks.push(Block::default());
        self.blocks.len() - 1
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The furthest `right` descendant: where code following this block's
    /// construct physically ends up.
    pub fn rightmost(&self, mut id: BlockId) -> BlockId {
        while let Some(next) = self[id].right {
            id = next;
        }
        id
    }
}

impl std::ops::Index<BlockId> for BlockArena {
    type Output = Block;
    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }
}

impl std::ops::IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }
}

/// Builds one block graph per procedure body.
pub struct FlowGraphBuilder<'a> {
    arena: &'a mut BlockArena,
}

impl<'a> FlowGraphBuilder<'a> {
    pub fn new(arena: &'a mut BlockArena) -> Self {
        FlowGraphBuilder { arena }
    }

    /// Turn a command list into a block graph, returning the entry block.
    pub fn build(&mut self, commands: &[Command]) -> BlockId {
        let root = self.arena.alloc();
        self.process(commands, root);
        root
    }

    fn process(&mut self, commands: &[Command], mut cur: BlockId) {
        for command in commands {
            match command {
                Command::IfElse {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    self.arena[cur].cond = Some(cond.clone());
                    let left = self.arena.alloc();
                    self.arena[cur].left = Some(left);
                    self.process(then_branch, left);
                    if else_branch.is_empty() {
                        // the branch-taken path is simply the following code
                        let next = self.arena.alloc();
                        self.arena[cur].right = Some(next);
                        cur = next;
                    } else {
                        let right = self.arena.alloc();
                        self.arena[cur].right = Some(right);
                        self.process(else_branch, right);
                        // a join block follows both branches; the then path
                        // reaches it by jumping over the else code
                        let join = self.arena.alloc();
                        self.arena[left].jump_to_block = Some(join);
                        let tail = self.arena.rightmost(right);
                        self.arena[tail].right = Some(join);
                        self.arena[join].join_spill = true;
                        cur = join;
                    }
                }
                Command::While { cond, body } => {
                    self.arena[cur].cond = Some(cond.clone());
                    let left = self.arena.alloc();
                    self.arena[cur].left = Some(left);
                    self.process(body, left);
                    self.arena[left].jump_to_condition = Some(cur);
                    let next = self.arena.alloc();
                    self.arena[cur].right = Some(next);
                    cur = next;
                }
                Command::RepeatUntil { body, cond } => {
                    // `repeat B until c` is `B; if not c goto B`: guard on
                    // the negated condition, body as the fall-through path
                    self.arena[cur].cond = Some(cond.negated());
                    let left = self.arena.alloc();
                    self.arena[cur].left = Some(left);
                    self.process(body, left);
                    self.arena[left].jump_to_condition = Some(cur);
                    let next = self.arena.alloc();
                    self.arena[cur].right = Some(next);
                    cur = next;
                }
                straight => self.arena[cur].commands.push(straight.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Operand, RelOp};

    fn assign(name: &str, v: u64) -> Command {
        Command::Assign {
            target: Operand::Scalar(name.to_string()),
            value: Expression::Value(Operand::Imm(v)),
        }
    }

    fn cond(rel: RelOp) -> Condition {
        Condition {
            rel,
            left: Operand::Scalar("x".to_string()),
            right: Operand::Scalar("y".to_string()),
        }
    }

    #[test]
    fn straight_line_commands_share_one_block() {
        let mut arena = BlockArena::new();
        let root = FlowGraphBuilder::new(&mut arena).build(&[assign("x", 1), assign("y", 2)]);
        assert_eq!(arena[root].commands.len(), 2);
        assert!(arena[root].left.is_none());
        assert!(arena[root].right.is_none());
    }

    #[test]
    fn while_body_loops_back_to_the_condition() {
        let mut arena = BlockArena::new();
        let root = FlowGraphBuilder::new(&mut arena).build(&[Command::While {
            cond: cond(RelOp::Gt),
            body: vec![assign("x", 1)],
        }]);
        let body = arena[root].left.unwrap();
        assert_eq!(arena[body].jump_to_condition, Some(root));
        assert!(arena[root].right.is_some());
        assert!(!arena[root].join_spill);
    }

    #[test]
    fn repeat_negates_the_condition_into_a_guard() {
        let mut arena = BlockArena::new();
        let root = FlowGraphBuilder::new(&mut arena).build(&[Command::RepeatUntil {
            body: vec![assign("x", 1)],
            cond: cond(RelOp::Gt),
        }]);
        let guard = arena[root].cond.as_ref().unwrap();
        assert_eq!(guard.rel, RelOp::Ge);
        assert_eq!(guard.left, Operand::Scalar("y".to_string()));
        let body = arena[root].left.unwrap();
        assert_eq!(arena[body].jump_to_condition, Some(root));
    }

    #[test]
    fn if_else_joins_through_a_forward_jump() {
        let mut arena = BlockArena::new();
        let root = FlowGraphBuilder::new(&mut arena).build(&[
            Command::IfElse {
                cond: cond(RelOp::Eq),
                then_branch: vec![assign("x", 1)],
                else_branch: vec![assign("x", 2)],
            },
            assign("y", 3),
        ]);
        let then = arena[root].left.unwrap();
        let els = arena[root].right.unwrap();
        let join = arena[then].jump_to_block.unwrap();
        assert_eq!(arena.rightmost(els), join);
        assert!(arena[join].join_spill);
        // the trailing command lands in the join block
        assert_eq!(arena[join].commands.len(), 1);
    }

    #[test]
    fn if_without_else_continues_in_the_right_child() {
        let mut arena = BlockArena::new();
        let root = FlowGraphBuilder::new(&mut arena).build(&[
            Command::IfElse {
                cond: cond(RelOp::Eq),
                then_branch: vec![assign("x", 1)],
                else_branch: vec![],
            },
            assign("y", 3),
        ]);
        let next = arena[root].right.unwrap();
        assert_eq!(arena[next].commands.len(), 1);
        assert!(arena[arena[root].left.unwrap()].jump_to_block.is_none());
    }
}
