//! COSE_Key decoding for EC2 credential public keys

use ciborium::value::Value;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};

use crate::error::ParseError;

const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_Y: i64 = -3;

/// COSE key type EC2
pub const KTY_EC2: i64 = 2;

/// EC2 public key as carried in attested credential data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub alg: Option<i64>,
    pub crv: i64,
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

impl CoseKey {
    /// Decode a CBOR-encoded COSE_Key.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ParseError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| ParseError::Cbor(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ParseError> {
        let map = value
            .as_map()
            .ok_or_else(|| ParseError::Cbor("COSE key is not a map".into()))?;

        let int_label = |label: i64| -> Option<&Value> {
            map.iter().find_map(|(k, v)| {
                let key = k.as_integer().and_then(|i| i64::try_from(i).ok())?;
                (key == label).then_some(v)
            })
        };
        let as_i64 =
            |v: &Value| -> Option<i64> { v.as_integer().and_then(|i| i64::try_from(i).ok()) };

        let kty = int_label(LABEL_KTY)
            .and_then(as_i64)
            .ok_or(ParseError::MissingField("kty"))?;
        if kty != KTY_EC2 {
            return Err(ParseError::UnsupportedKey(format!("kty {kty}")));
        }

        let alg = int_label(LABEL_ALG).and_then(as_i64);
        let crv = int_label(LABEL_CRV)
            .and_then(as_i64)
            .ok_or(ParseError::MissingField("crv"))?;
        let x = int_label(LABEL_X)
            .and_then(Value::as_bytes)
            .ok_or(ParseError::MissingField("x"))?
            .clone();
        let y = int_label(LABEL_Y)
            .and_then(Value::as_bytes)
            .ok_or(ParseError::MissingField("y"))?
            .clone();

        Ok(Self { alg, crv, x, y })
    }

    /// SEC1 uncompressed point: `0x04 || x || y`
    pub fn uncompressed_point(&self) -> Vec<u8> {
        let mut point = Vec::with_capacity(1 + self.x.len() + self.y.len());
        point.push(0x04);
        point.extend_from_slice(&self.x);
        point.extend_from_slice(&self.y);
        point
    }

    /// Declared `alg`, or the ECDSA identifier implied by `crv`.
    pub fn algorithm(&self) -> Result<i64, ParseError> {
        match (self.alg, self.crv) {
            (Some(alg), _) => Ok(alg),
            (None, 1) => Ok(-7),
            (None, 2) => Ok(-35),
            (None, 3) => Ok(-36),
            (None, other) => Err(ParseError::UnsupportedKey(format!("crv {other}"))),
        }
    }

    fn curve(&self) -> Result<Nid, ParseError> {
        match self.crv {
            1 => Ok(Nid::X9_62_PRIME256V1),
            2 => Ok(Nid::SECP384R1),
            3 => Ok(Nid::SECP521R1),
            other => Err(ParseError::UnsupportedKey(format!("crv {other}"))),
        }
    }

    /// Build an openssl public key, checking the point lies on the curve.
    pub fn to_public_key(&self) -> Result<PKey<Public>, ParseError> {
        let crypto = |e: openssl::error::ErrorStack| ParseError::UnsupportedKey(e.to_string());

        let group = EcGroup::from_curve_name(self.curve()?).map_err(crypto)?;
        let x = BigNum::from_slice(&self.x).map_err(crypto)?;
        let y = BigNum::from_slice(&self.y).map_err(crypto)?;
        let ec_key = EcKey::from_public_key_affine_coordinates(&group, &x, &y).map_err(crypto)?;
        ec_key.check_key().map_err(crypto)?;
        PKey::from_ec_key(ec_key).map_err(crypto)
    }

    /// Encode back to CBOR
    pub fn to_cbor(&self) -> Vec<u8> {
        let mut entries = vec![(Value::Integer(LABEL_KTY.into()), Value::Integer(KTY_EC2.into()))];
        if let Some(alg) = self.alg {
            entries.push((Value::Integer(LABEL_ALG.into()), Value::Integer(alg.into())));
        }
        entries.push((Value::Integer(LABEL_CRV.into()), Value::Integer(self.crv.into())));
        entries.push((Value::Integer(LABEL_X.into()), Value::Bytes(self.x.clone())));
        entries.push((Value::Integer(LABEL_Y.into()), Value::Bytes(self.y.clone())));

        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = ciborium::into_writer(&Value::Map(entries), &mut out);
        out
    }
}
