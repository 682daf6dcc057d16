use std::fmt;

use crate::{
    constant_pool::{ConstantPool, ConstantPoolError},
    id::{BytecodeOffset, ConstantPoolIndex, NodeIndex},
};

use self::{
    decode::{decode, DecodeError},
    graph::{GraphBuildError, InstGraph, InstNode},
};

pub mod decode;
pub mod graph;
pub mod inst;
pub mod op;

/// An exception table entry as it appears in a class file, with byte offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawExceptionEntry {
    pub start_pc: BytecodeOffset,
    /// Exclusive
    pub end_pc: BytecodeOffset,
    pub handler_pc: BytecodeOffset,
    /// Zero means that it catches anything
    pub catch_type: u16,
}

/// An exception table entry resolved onto the instruction graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: NodeIndex,
    /// Exclusive. `None` means the range extends to the end of the code
    pub end: Option<NodeIndex>,
    pub handler: NodeIndex,
    /// Name of the class caught, `None` for catch-any (`finally`)
    pub catch_type: Option<String>,
}
impl ExceptionHandler {
    /// Whether the node is within `[start, end)`
    #[must_use]
    pub fn covers(&self, node: NodeIndex) -> bool {
        node >= self.start && self.end.map_or(true, |end| node < end)
    }

    /// The number of nodes in the range, for choosing the innermost of overlapping handlers
    #[must_use]
    pub fn span(&self, node_count: usize) -> usize {
        let end = self.end.map_or(node_count, NodeIndex::as_usize);
        end.saturating_sub(self.start.as_usize())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CodeError {
    Decode(DecodeError),
    Graph(GraphBuildError),
    /// Catch type of an exception entry was not a valid class constant
    CatchType(ConstantPoolError),
    /// An exception handler's range was empty or inverted
    InvalidHandlerRange {
        start_pc: BytecodeOffset,
        end_pc: BytecodeOffset,
    },
}
impl From<DecodeError> for CodeError {
    fn from(err: DecodeError) -> Self {
        CodeError::Decode(err)
    }
}
impl From<GraphBuildError> for CodeError {
    fn from(err: GraphBuildError) -> Self {
        CodeError::Graph(err)
    }
}
impl From<ConstantPoolError> for CodeError {
    fn from(err: ConstantPoolError) -> Self {
        CodeError::CatchType(err)
    }
}
impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeError::Decode(err) => write!(f, "{}", err),
            CodeError::Graph(err) => write!(f, "{}", err),
            CodeError::CatchType(err) => write!(f, "bad exception catch type: {}", err),
            CodeError::InvalidHandlerRange { start_pc, end_pc } => {
                write!(f, "invalid exception range {}..{}", start_pc, end_pc)
            }
        }
    }
}
impl std::error::Error for CodeError {}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeInfo {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) graph: InstGraph,
    pub(crate) exception_table: Vec<ExceptionHandler>,
}
impl CodeInfo {
    #[must_use]
    pub fn new(
        max_stack: u16,
        max_locals: u16,
        graph: InstGraph,
        exception_table: Vec<ExceptionHandler>,
    ) -> CodeInfo {
        CodeInfo {
            max_stack,
            max_locals,
            graph,
            exception_table,
        }
    }

    /// Decode raw bytecode and build its graph, resolving the exception table onto it.
    /// Catch types are looked up in the constant pool of the owning class.
    pub fn from_bytecode(
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
        raw_exception_table: &[RawExceptionEntry],
        constant_pool: &ConstantPool,
    ) -> Result<CodeInfo, CodeError> {
        let graph = InstGraph::build(decode(code)?)?;

        let mut exception_table = Vec::with_capacity(raw_exception_table.len());
        for entry in raw_exception_table {
            if entry.start_pc >= entry.end_pc {
                return Err(CodeError::InvalidHandlerRange {
                    start_pc: entry.start_pc,
                    end_pc: entry.end_pc,
                });
            }

            let start = graph.index_of_offset(entry.start_pc).ok_or(
                GraphBuildError::InvalidHandlerOffset {
                    offset: entry.start_pc,
                },
            )?;
            let end = graph.index_of_end_offset(entry.end_pc, code.len())?;
            let handler = graph.index_of_offset(entry.handler_pc).ok_or(
                GraphBuildError::InvalidHandlerOffset {
                    offset: entry.handler_pc,
                },
            )?;
            let catch_type = if entry.catch_type == 0 {
                None
            } else {
                Some(
                    constant_pool
                        .get_class_name(ConstantPoolIndex::new(entry.catch_type))?
                        .to_owned(),
                )
            };

            exception_table.push(ExceptionHandler {
                start,
                end,
                handler,
                catch_type,
            });
        }

        Ok(CodeInfo {
            max_stack,
            max_locals,
            graph,
            exception_table,
        })
    }

    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[must_use]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[must_use]
    pub fn graph(&self) -> &InstGraph {
        &self.graph
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&InstNode> {
        self.graph.get(index)
    }

    #[must_use]
    pub fn exception_table(&self) -> &[ExceptionHandler] {
        &self.exception_table
    }
}

#[cfg(test)]
mod tests {
    use crate::{constant_pool::ConstantPool, id::NodeIndex};

    use super::{CodeError, CodeInfo, RawExceptionEntry};

    #[test]
    fn test_exception_table() {
        let mut pool = ConstantPool::new();
        let npe = pool.class("java/lang/NullPointerException").unwrap();

        // 0: nop, 1: nop, 2: return, 3: athrow
        let code = [0x00, 0x00, 0xb1, 0xbf];
        let table = [
            RawExceptionEntry {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 3,
                catch_type: npe.get(),
            },
            RawExceptionEntry {
                start_pc: 1,
                end_pc: 4,
                handler_pc: 3,
                catch_type: 0,
            },
        ];
        let code = CodeInfo::from_bytecode(1, 0, &code, &table, &pool).unwrap();
        let handlers = code.exception_table();
        assert_eq!(
            handlers[0].catch_type.as_deref(),
            Some("java/lang/NullPointerException")
        );
        assert_eq!(handlers[0].end, Some(NodeIndex::new(2)));
        assert!(handlers[0].covers(NodeIndex::new(1)));
        assert!(!handlers[0].covers(NodeIndex::new(2)));
        // End of code
        assert_eq!(handlers[1].end, None);
        assert!(handlers[1].covers(NodeIndex::new(3)));
        assert_eq!(handlers[1].catch_type, None);
        assert_eq!(handlers[1].span(code.graph().len()), 3);

        let bad = [RawExceptionEntry {
            start_pc: 2,
            end_pc: 2,
            handler_pc: 3,
            catch_type: 0,
        }];
        assert!(matches!(
            CodeInfo::from_bytecode(1, 0, &[0x00, 0x00, 0xb1, 0xbf], &bad, &pool),
            Err(CodeError::InvalidHandlerRange { .. })
        ));
    }
}
