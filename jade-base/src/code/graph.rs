use std::{collections::HashMap, fmt};

use crate::{
    id::{BytecodeOffset, NodeIndex},
    util::{HashWrapper, HashWrapperTrait},
};

use super::{decode::DecodedInst, inst::Inst, op::Opcode};

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphBuildError {
    /// Methods with code must have at least one instruction
    Empty,
    /// A branch pointed somewhere that is not the start of an instruction
    InvalidBranchTarget {
        offset: BytecodeOffset,
        target: i64,
    },
    /// An exception handler range pointed somewhere that is not the start of an instruction
    InvalidHandlerOffset { offset: BytecodeOffset },
    /// The last instruction can fall through past the end of the code
    FallsOffEnd { offset: BytecodeOffset },
    TooManyNodes,
}
impl fmt::Display for GraphBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphBuildError::Empty => f.write_str("code has no instructions"),
            GraphBuildError::InvalidBranchTarget { offset, target } => write!(
                f,
                "branch at {} targets {} which is not an instruction",
                offset, target
            ),
            GraphBuildError::InvalidHandlerOffset { offset } => {
                write!(f, "exception handler offset {} is not an instruction", offset)
            }
            GraphBuildError::FallsOffEnd { offset } => {
                write!(f, "instruction at {} falls off the end of the code", offset)
            }
            GraphBuildError::TooManyNodes => f.write_str("too many instructions"),
        }
    }
}
impl std::error::Error for GraphBuildError {}

/// A single instruction in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct InstNode {
    pub(crate) opcode: Opcode,
    pub(crate) inst: Inst<NodeIndex>,
    /// Fall-through edge, `None` if the instruction never falls through
    pub(crate) next: Option<NodeIndex>,
    pub(crate) offset: BytecodeOffset,
}
impl InstNode {
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub fn inst(&self) -> &Inst<NodeIndex> {
        &self.inst
    }

    #[must_use]
    pub fn next(&self) -> Option<NodeIndex> {
        self.next
    }

    #[must_use]
    pub fn offset(&self) -> BytecodeOffset {
        self.offset
    }
}

type OffsetMap = HashMap<
    BytecodeOffset,
    NodeIndex,
    <HashWrapper as HashWrapperTrait<BytecodeOffset>>::HashMapHasher,
>;

/// The instructions of a method with every edge resolved to a node
#[derive(Debug, Clone, PartialEq)]
pub struct InstGraph {
    nodes: Vec<InstNode>,
}
impl InstGraph {
    /// Build the graph, resolving every relative branch to the node it points at
    pub fn build(decoded: Vec<DecodedInst>) -> Result<InstGraph, GraphBuildError> {
        if decoded.is_empty() {
            return Err(GraphBuildError::Empty);
        }

        let mut offsets = OffsetMap::default();
        for (i, inst) in decoded.iter().enumerate() {
            let index = u32::try_from(i).map_err(|_| GraphBuildError::TooManyNodes)?;
            offsets.insert(inst.offset, NodeIndex::new(index));
        }

        let count = decoded.len();
        let mut nodes = Vec::with_capacity(count);
        for (i, decoded) in decoded.into_iter().enumerate() {
            let DecodedInst {
                offset,
                opcode,
                inst,
            } = decoded;

            let next = if inst.falls_through() {
                if i + 1 >= count {
                    return Err(GraphBuildError::FallsOffEnd { offset });
                }
                Some(NodeIndex::new(
                    u32::try_from(i + 1).map_err(|_| GraphBuildError::TooManyNodes)?,
                ))
            } else {
                None
            };

            let inst = inst.try_map_targets(|relative| {
                let target = i64::from(offset) + i64::from(relative);
                u32::try_from(target)
                    .ok()
                    .and_then(|x| offsets.get(&x).copied())
                    .ok_or(GraphBuildError::InvalidBranchTarget { offset, target })
            })?;

            nodes.push(InstNode {
                opcode,
                inst,
                next,
                offset,
            });
        }

        tracing::trace!("Built instruction graph with {} nodes", nodes.len());

        Ok(InstGraph { nodes })
    }

    #[must_use]
    pub fn entry(&self) -> NodeIndex {
        NodeIndex::new(0)
    }

    #[must_use]
    pub fn get(&self, index: NodeIndex) -> Option<&InstNode> {
        self.nodes.get(index.as_usize())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &InstNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| Some((NodeIndex::new(u32::try_from(i).ok()?), node)))
    }

    /// Find the node that starts at the bytecode offset.
    /// Nodes are in increasing offset order.
    #[must_use]
    pub fn index_of_offset(&self, offset: BytecodeOffset) -> Option<NodeIndex> {
        let i = self.nodes.binary_search_by_key(&offset, |x| x.offset).ok()?;
        u32::try_from(i).ok().map(NodeIndex::new)
    }

    /// Find the node for an offset that may be the end of the code, as the exclusive end of an
    /// exception range can be.
    /// `Ok(None)` means the end of the code.
    pub(crate) fn index_of_end_offset(
        &self,
        offset: BytecodeOffset,
        code_len: usize,
    ) -> Result<Option<NodeIndex>, GraphBuildError> {
        if usize::try_from(offset).ok() == Some(code_len) {
            return Ok(None);
        }

        self.index_of_offset(offset)
            .map(Some)
            .ok_or(GraphBuildError::InvalidHandlerOffset { offset })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        code::{decode::decode, inst::Inst},
        id::NodeIndex,
    };

    use super::{GraphBuildError, InstGraph};

    #[test]
    fn test_resolve_edges() {
        // 0: iconst_0
        // 1: ifeq +6 (-> 7)
        // 4: goto +4 (-> 8)
        // 7: nop
        // 8: return
        let code = [0x03, 0x99, 0x00, 0x06, 0xa7, 0x00, 0x04, 0x00, 0xb1];
        let graph = InstGraph::build(decode(&code).unwrap()).unwrap();
        assert_eq!(graph.len(), 5);

        let branch = graph.get(NodeIndex::new(1)).unwrap();
        assert!(matches!(branch.inst(), Inst::If(_, target) if *target == NodeIndex::new(3)));
        assert_eq!(branch.next(), Some(NodeIndex::new(2)));

        let goto = graph.get(NodeIndex::new(2)).unwrap();
        assert_eq!(goto.inst(), &Inst::Goto(NodeIndex::new(4)));
        assert_eq!(goto.next(), None);

        assert_eq!(graph.index_of_offset(7), Some(NodeIndex::new(3)));
        assert_eq!(graph.index_of_offset(2), None);
    }

    #[test]
    fn test_invalid_graphs() {
        // goto into the middle of itself
        let code = [0xa7, 0x00, 0x01];
        assert_eq!(
            InstGraph::build(decode(&code).unwrap()),
            Err(GraphBuildError::InvalidBranchTarget {
                offset: 0,
                target: 1
            })
        );

        // iconst_0 with nothing after it
        assert_eq!(
            InstGraph::build(decode(&[0x03]).unwrap()),
            Err(GraphBuildError::FallsOffEnd { offset: 0 })
        );

        assert_eq!(InstGraph::build(Vec::new()), Err(GraphBuildError::Empty));
    }
}
