// Vertex and index data model
//
// The renderer treats vertex/index payloads as opaque byte arrays plus a
// format descriptor. Formats only exist to answer stride/count questions;
// interpretation of the bytes is entirely the pipeline's business.

use crate::resource::BufferHandle;

/// Element width of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn stride(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// A typed vertex column. The numeric format of each column is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VertexColumn {
    /// X Y Z float
    Position = 0,
    /// RGBA8
    Color,
    /// X Y float
    Texcoord,
    /// X Y Z float
    Normal,
    /// X Y Z float
    Tangent,
}

impl VertexColumn {
    pub const COUNT: usize = 5;

    const ALL: [VertexColumn; Self::COUNT] = [
        VertexColumn::Position,
        VertexColumn::Color,
        VertexColumn::Texcoord,
        VertexColumn::Normal,
        VertexColumn::Tangent,
    ];

    /// Byte stride of one element of this column.
    pub fn stride(self) -> usize {
        match self {
            VertexColumn::Position => 12,
            VertexColumn::Color => 4,
            VertexColumn::Texcoord => 8,
            VertexColumn::Normal => 12,
            VertexColumn::Tangent => 12,
        }
    }

    fn flag(self) -> u32 {
        1u32 << (self as u32)
    }
}

/// Set of columns interleaved into one vertex array, stored as flags.
/// Columns are laid out in enum order within a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VertexArrayFormat(u32);

impl VertexArrayFormat {
    pub fn new(columns: &[VertexColumn]) -> Self {
        let mut flags = 0u32;
        for c in columns {
            flags |= c.flag();
        }
        Self(flags)
    }

    pub fn contains(self, column: VertexColumn) -> bool {
        self.0 & column.flag() != 0
    }

    /// Byte stride of one interleaved vertex row.
    pub fn row_stride(self) -> usize {
        VertexColumn::ALL
            .iter()
            .filter(|c| self.contains(**c))
            .map(|c| c.stride())
            .sum()
    }

    /// Byte offset of `column` within a row, counting only columns present.
    pub fn column_offset(self, column: VertexColumn) -> usize {
        VertexColumn::ALL
            .iter()
            .take_while(|c| **c != column)
            .filter(|c| self.contains(**c))
            .map(|c| c.stride())
            .sum()
    }
}

/// Full vertex format: one array format per vertex array (multiple arrays
/// means multiple bound vertex buffers).
#[derive(Debug, Clone, Default)]
pub struct VertexFormat {
    pub arrays: Vec<VertexArrayFormat>,
}

impl VertexFormat {
    pub fn single(columns: &[VertexColumn]) -> Self {
        Self {
            arrays: vec![VertexArrayFormat::new(columns)],
        }
    }
}

/// Caller-owned vertex payload: CPU byte arrays plus the registry handles of
/// the device-local buffers they get uploaded into.
#[derive(Debug)]
pub struct VertexData {
    pub format: VertexFormat,
    pub arrays: Vec<Vec<u8>>,
    pub buffers: Vec<BufferHandle>,
}

impl VertexData {
    pub fn num_vertices(&self) -> usize {
        let (Some(format), Some(bytes)) = (self.format.arrays.first(), self.arrays.first()) else {
            return 0;
        };
        let stride = format.row_stride();
        if stride == 0 {
            return 0;
        }
        bytes.len() / stride
    }
}

/// Caller-owned index payload.
#[derive(Debug)]
pub struct IndexData {
    pub format: IndexFormat,
    pub data: Vec<u8>,
    pub buffer: BufferHandle,
}

impl IndexData {
    pub fn num_indices(&self) -> usize {
        self.data.len() / self.format.stride()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    Points,
}

/// A mesh references a vertex payload, an optional index payload, and a
/// subset range of whichever of the two drives the draw.
pub struct Mesh<'a> {
    pub vertex_data: &'a VertexData,
    pub index_data: Option<&'a IndexData>,
    pub first: u32,
    /// 0 means "everything from `first` to the end".
    pub count: u32,
    pub topology: PrimitiveTopology,
}

impl Mesh<'_> {
    pub fn is_indexed(&self) -> bool {
        self.index_data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_stride_sums_present_columns() {
        let fmt = VertexArrayFormat::new(&[
            VertexColumn::Position,
            VertexColumn::Normal,
            VertexColumn::Texcoord,
        ]);
        assert_eq!(fmt.row_stride(), 12 + 8 + 12);
    }

    #[test]
    fn column_offsets_follow_enum_order() {
        let fmt = VertexArrayFormat::new(&[
            VertexColumn::Position,
            VertexColumn::Texcoord,
            VertexColumn::Normal,
        ]);
        assert_eq!(fmt.column_offset(VertexColumn::Position), 0);
        // Color is absent, so texcoord comes right after position.
        assert_eq!(fmt.column_offset(VertexColumn::Texcoord), 12);
        assert_eq!(fmt.column_offset(VertexColumn::Normal), 20);
    }

    #[test]
    fn vertex_count_from_bytes() {
        let format = VertexFormat::single(&[VertexColumn::Position]);
        let data = VertexData {
            format,
            arrays: vec![vec![0u8; 36]],
            buffers: vec![BufferHandle::dangling()],
        };
        assert_eq!(data.num_vertices(), 3);
    }

    #[test]
    fn empty_format_has_no_vertices() {
        let data = VertexData {
            format: VertexFormat::default(),
            arrays: Vec::new(),
            buffers: Vec::new(),
        };
        assert_eq!(data.num_vertices(), 0);

        // A format with no columns has zero stride, so the byte length
        // cannot imply a vertex count either.
        let data = VertexData {
            format: VertexFormat::single(&[]),
            arrays: vec![vec![0u8; 16]],
            buffers: vec![BufferHandle::dangling()],
        };
        assert_eq!(data.num_vertices(), 0);
    }

    #[test]
    fn index_counts() {
        assert_eq!(IndexFormat::U16.stride(), 2);
        assert_eq!(IndexFormat::U32.stride(), 4);
        let data = IndexData {
            format: IndexFormat::U32,
            data: vec![0u8; 24],
            buffer: BufferHandle::dangling(),
        };
        assert_eq!(data.num_indices(), 6);
    }
}
