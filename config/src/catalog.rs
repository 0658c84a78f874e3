//! Catalogue of chaincode methods the command line can call.

use std::{collections::BTreeMap, fmt, fs, path::Path};

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

/// Declared type of a chaincode call parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// `bytes32`
    Bytes32,
    /// `bytes`
    Bytes,
    /// `string`
    String,
    /// `uint256`
    Uint256,
    /// `bytes32[]`, comma separated on the wire
    Bytes32Array,
    /// Any other type name, kept verbatim
    Other(String),
}

impl ParamType {
    /// Name as written in the catalogue
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bytes32 => "bytes32",
            Self::Bytes => "bytes",
            Self::String => "string",
            Self::Uint256 => "uint256",
            Self::Bytes32Array => "bytes32[]",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for ParamType {
    fn from(name: &str) -> Self {
        match name {
            "bytes32" => Self::Bytes32,
            "bytes" => Self::Bytes,
            "string" => Self::String,
            "uint256" => Self::Uint256,
            "bytes32[]" => Self::Bytes32Array,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ParamType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

/// One declared parameter of a method
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParamSpec {
    /// Parameter name, used when printing generated fixtures
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub ty: ParamType,
}

/// Declaration of a chaincode method
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSpec {
    /// Read-only methods are evaluated instead of submitted
    #[serde(default)]
    pub is_query: bool,
    /// Positional parameters
    #[serde(default)]
    pub callparams: Vec<ParamSpec>,
}

/// Errors raised by [`MethodCatalog`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalogue file could not be read
    #[error("Failed to read the method catalogue")]
    ReadFile,
    /// The catalogue is malformed
    #[error("The method catalogue is not valid")]
    Json,
    /// No such chaincode
    #[error("Unknown chaincode `{name}`. Valid ones are {valid}")]
    UnknownChaincode {
        /// Requested name
        name: String,
        /// Comma separated known chaincodes
        valid: String,
    },
    /// No such method in a known chaincode
    #[error("Unknown method `{method}`. Valid ones for chaincode `{chaincode}` are {valid}")]
    UnknownMethod {
        /// Chaincode name
        chaincode: String,
        /// Requested method
        method: String,
        /// Comma separated known methods
        valid: String,
    },
}

/// Methods of every known chaincode, keyed by chaincode then method name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MethodCatalog(BTreeMap<String, BTreeMap<String, MethodSpec>>);

impl MethodCatalog {
    /// Read the catalogue from a JSON file.
    ///
    /// # Errors
    /// If the file can't be read or is malformed.
    pub fn load(path: impl AsRef<Path>) -> error_stack::Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .change_context(CatalogError::ReadFile)
            .attach_printable_lazy(|| format!("catalogue path: {}", path.display()))?;
        Self::from_json_str(&content)
            .attach_printable_lazy(|| format!("catalogue path: {}", path.display()))
    }

    /// Parse the catalogue from JSON text.
    ///
    /// # Errors
    /// If `content` is malformed.
    pub fn from_json_str(content: &str) -> error_stack::Result<Self, CatalogError> {
        serde_json::from_str(content).change_context(CatalogError::Json)
    }

    /// Known chaincode names, sorted
    pub fn chaincodes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Methods of `chaincode`.
    ///
    /// # Errors
    /// If the chaincode is unknown.
    pub fn methods(&self, chaincode: &str) -> Result<&BTreeMap<String, MethodSpec>, CatalogError> {
        self.0
            .get(chaincode)
            .ok_or_else(|| CatalogError::UnknownChaincode {
                name: chaincode.to_owned(),
                valid: join(self.0.keys()),
            })
    }

    /// Declaration of `chaincode.method`.
    ///
    /// # Errors
    /// If the chaincode or the method is unknown.
    pub fn method(&self, chaincode: &str, method: &str) -> Result<&MethodSpec, CatalogError> {
        let methods = self.methods(chaincode)?;
        methods
            .get(method)
            .ok_or_else(|| CatalogError::UnknownMethod {
                chaincode: chaincode.to_owned(),
                method: method.to_owned(),
                valid: join(methods.keys()),
            })
    }

    /// Add or replace a declaration
    pub fn insert(&mut self, chaincode: impl Into<String>, method: impl Into<String>, spec: MethodSpec) {
        self.0
            .entry(chaincode.into())
            .or_default()
            .insert(method.into(), spec);
    }
}

fn join<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(",")
}
