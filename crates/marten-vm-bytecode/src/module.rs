//! Bytecode module format

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::function::Function;
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

/// A compiled bytecode module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Source URL/path
    pub source_url: String,

    /// Constant pool (shared across all functions)
    pub constants: ConstantPool,

    /// Functions defined in this module
    pub functions: Vec<Function>,

    /// Entry point function index
    pub entry_point: u32,
}

impl Module {
    /// Create a new module builder
    pub fn builder(source_url: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder::new(source_url)
    }

    /// Serialize module to bytes with magic and version framing
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();

        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());

        let data = encode(self)?;
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);

        Ok(bytes)
    }

    /// Deserialize module from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(BytecodeError::UnexpectedEnd);
        }

        if bytes[0..8] != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let data_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

        if bytes.len() < 16 + data_len {
            return Err(BytecodeError::UnexpectedEnd);
        }

        decode(&bytes[16..16 + data_len])
    }

    /// Write module to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Read module from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Get the entry point function
    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.get(self.entry_point as usize)
    }

    /// Get a function by index
    pub fn function(&self, index: u32) -> Option<&Function> {
        self.functions.get(index as usize)
    }
}

/// Builder for creating modules
#[derive(Debug)]
pub struct ModuleBuilder {
    source_url: String,
    constants: ConstantPool,
    functions: Vec<Function>,
    entry_point: u32,
}

impl ModuleBuilder {
    /// Create a new module builder
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            constants: ConstantPool::new(),
            functions: Vec::new(),
            entry_point: 0,
        }
    }

    /// Set constant pool
    pub fn constants(mut self, constants: ConstantPool) -> Self {
        self.constants = constants;
        self
    }

    /// Get mutable reference to constant pool
    pub fn constants_mut(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Add a function, returns its index
    pub fn add_function(&mut self, function: Function) -> u32 {
        let idx = self.functions.len() as u32;
        self.functions.push(function);
        idx
    }

    /// Set entry point function index
    pub fn entry_point(mut self, index: u32) -> Self {
        self.entry_point = index;
        self
    }

    /// Build the module
    pub fn build(self) -> Module {
        Module {
            source_url: self.source_url,
            constants: self.constants,
            functions: self.functions,
            entry_point: self.entry_point,
        }
    }
}

// serde_json keeps the cache format debuggable; the framing above carries the
// versioning.
fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        BytecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        BytecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operand::Register;

    #[test]
    fn test_module_roundtrip() {
        let mut builder = Module::builder("test.js");

        builder.constants_mut().add_string("hello");
        builder.constants_mut().add_number(42.0);

        let func = Function::builder()
            .name("main")
            .instruction(Instruction::LoadInt32 {
                dst: Register(0),
                value: 1,
            })
            .instruction(Instruction::Return { src: Register(0) })
            .build();

        builder.add_function(func);

        let module = builder.build();

        let bytes = module.to_bytes().unwrap();
        let restored = Module::from_bytes(&bytes).unwrap();

        assert_eq!(restored.source_url, "test.js");
        assert_eq!(restored.constants.len(), 2);
        assert_eq!(restored.functions.len(), 1);
        assert_eq!(restored.functions[0].instructions.len(), 2);
    }

    #[test]
    fn test_invalid_magic() {
        // Need at least 16 bytes to pass the length check before the magic check
        let bytes = b"INVALID\0........";
        let result = Module::from_bytes(bytes);
        assert!(matches!(result, Err(BytecodeError::InvalidMagic)));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = b"MART";
        let result = Module::from_bytes(bytes);
        assert!(matches!(result, Err(BytecodeError::UnexpectedEnd)));
    }
}
