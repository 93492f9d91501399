//! Immutable command-buffer data model plus the minimal builder needed to
//! assemble one: the HAL recording API is out of scope, but something has
//! to build a `CommandBuffer` for tests and the demo to hand the
//! scheduler.

use alloc::vec::Vec;

use gpuq_abi::{CommandRecord, CommandBody};

use crate::error::CoreError;
use gpuq_abi::ExhaustedResource;

/// Per-command query-signal offsets within a block's acquired query range,
/// chosen by `state.flags`'s tracing mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryIds {
    pub dispatch_id: Option<u32>,
    pub control_id: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryMap {
    pub max_dispatch_query_count: u32,
    pub max_control_query_count: u32,
}

/// An immutable, 64B-aligned block of recorded commands.
pub struct CommandBlock {
    pub max_packet_count: u32,
    pub commands: Vec<CommandRecord>,
    pub query_map: QueryMap,
    pub query_ids: Vec<QueryIds>,
    /// Out-of-band binding refs, constants, and update buffers the
    /// commands' `*_ref`/`*_offset` fields index into.
    pub embedded_data: Vec<u8>,
}

/// An immutable command buffer: `{max_kernarg_capacity, blocks[]}`.
/// Never mutated after construction.
pub struct CommandBuffer {
    pub max_kernarg_capacity: u32,
    pub blocks: Vec<CommandBlock>,
}

impl CommandBuffer {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

pub struct BlockBuilder {
    max_packet_count: u32,
    packets_used: u32,
    commands: Vec<CommandRecord>,
    query_ids: Vec<QueryIds>,
    embedded_data: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(max_packet_count: u32) -> Self {
        Self {
            max_packet_count,
            packets_used: 0,
            commands: Vec::new(),
            query_ids: Vec::new(),
            embedded_data: Vec::new(),
        }
    }

    /// Appends a command, computing its `packet_offset` from the running
    /// packet count and rejecting anything that would violate invariant 4
    /// (`packet_offset + aql_packet_count <= max_packet_count`).
    pub fn command(&mut self, flags: u8, body: CommandBody, query_ids: QueryIds) -> Result<&mut Self, CoreError> {
        let packet_offset = self.packets_used;
        let count = body.aql_packet_count();
        if packet_offset + count > self.max_packet_count {
            return Err(CoreError::Malformed {
                cmd_type: body.command_type() as u8,
                ordinal: self.commands.len() as u32,
            });
        }
        self.commands.push(CommandRecord::new(flags, packet_offset as u16, body));
        self.query_ids.push(query_ids);
        self.packets_used += count;
        Ok(self)
    }

    pub fn embed(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.embedded_data.len() as u32;
        self.embedded_data.extend_from_slice(bytes);
        offset
    }

    pub fn finish(self, query_map: QueryMap) -> CommandBlock {
        CommandBlock {
            max_packet_count: self.max_packet_count,
            commands: self.commands,
            query_map,
            query_ids: self.query_ids,
            embedded_data: self.embedded_data,
        }
    }
}

pub struct CommandBufferBuilder {
    max_kernarg_capacity: u32,
    blocks: Vec<CommandBlock>,
}

impl CommandBufferBuilder {
    pub fn new(max_kernarg_capacity: u32) -> Self {
        Self {
            max_kernarg_capacity,
            blocks: Vec::new(),
        }
    }

    pub fn push_block(&mut self, block: CommandBlock) -> Result<u32, CoreError> {
        if self.blocks.len() as u32 == u32::MAX {
            return Err(CoreError::Exhausted {
                resource: ExhaustedResource::ExecutionQueue,
                capacity: u32::MAX,
            });
        }
        let ordinal = self.blocks.len() as u32;
        self.blocks.push(block);
        Ok(ordinal)
    }

    pub fn finish(self) -> CommandBuffer {
        CommandBuffer {
            max_kernarg_capacity: self.max_kernarg_capacity,
            blocks: self.blocks,
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use gpuq_abi::CommandBody;

    #[test]
    fn straight_line_block_tracks_packet_offsets() {
        let mut block = BlockBuilder::new(4);
        block.command(0, CommandBody::DispatchDirect {
            kernel_ref: 0,
            grid_size: [1, 1, 1],
            workgroup_size: [1, 1, 1],
            kernarg_offset: 0,
            binding_table_offset: 0,
            binding_count: 0,
        }, QueryIds::default()).unwrap();
        block.command(0, CommandBody::Barrier, QueryIds::default()).unwrap();
        let built = block.finish(QueryMap::default());
        assert_eq!(built.commands[0].packet_offset, 0);
        assert_eq!(built.commands[1].packet_offset, 1);
    }

    #[test]
    fn overflowing_max_packet_count_is_malformed() {
        let mut block = BlockBuilder::new(1);
        block.command(0, CommandBody::Barrier, QueryIds::default()).unwrap();
        let err = block
            .command(0, CommandBody::Barrier, QueryIds::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::Malformed { .. }));
    }
}
