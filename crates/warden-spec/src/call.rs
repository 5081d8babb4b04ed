use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use serde::{Deserialize, Serialize};

use crate::error::WardenError;
use crate::EXECUTE_SIGNATURE;

/// A single call an account is asked to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(to: Address, value: U256, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            value,
            data: data.into(),
        }
    }

    /// Four-byte function selector, if the calldata carries one.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4)?.try_into().ok()
    }

    /// ABI word of the `index`-th static parameter.
    pub fn param_word(&self, index: usize) -> Option<[u8; 32]> {
        let start = 4usize.checked_add(index.checked_mul(32)?)?;
        let end = start.checked_add(32)?;
        self.data.get(start..end)?.try_into().ok()
    }
}

/// Wraps a call into the account's `execute(address,uint256,bytes)` entry point.
pub fn encode_execute(call: &Call) -> Bytes {
    let mut data = id(EXECUTE_SIGNATURE).to_vec();
    data.extend(abi::encode(&[
        Token::Address(call.to),
        Token::Uint(call.value),
        Token::Bytes(call.data.to_vec()),
    ]));
    data.into()
}

/// Inverse of [`encode_execute`].
pub fn decode_execute(data: &[u8]) -> Result<Call, WardenError> {
    if data.len() < 4 || data[..4] != id(EXECUTE_SIGNATURE) {
        return Err(WardenError::Malformed(
            "calldata is not an account execute call".to_string(),
        ));
    }

    let tokens = abi::decode(
        &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
        &data[4..],
    )
    .map_err(|e| WardenError::Malformed(format!("execute calldata: {}", e)))?;

    match tokens.as_slice() {
        [Token::Address(to), Token::Uint(value), Token::Bytes(inner)] => {
            Ok(Call::new(*to, *value, inner.clone()))
        }
        _ => Err(WardenError::Malformed(
            "unexpected execute parameters".to_string(),
        )),
    }
}
