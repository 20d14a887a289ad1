#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mssql_types::decode_value;
use tds_protocol::typeinfo::{TypeId, TypeInfo};

fuzz_target!(|input: (u8, u8, &[u8])| {
    let (type_byte, scale, data) = input;
    let Some(type_id) = TypeId::from_u8(type_byte) else {
        return;
    };
    let info = match type_id {
        TypeId::DecimalN | TypeId::NumericN => TypeInfo::decimal(38, scale % 39),
        TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
            TypeInfo::with_scale(type_id, scale % 8)
        }
        TypeId::NVarChar => TypeInfo::nvarchar(if scale % 2 == 0 { 0xFFFF } else { 200 }),
        TypeId::BigVarBinary => TypeInfo::varbinary(if scale % 2 == 0 { 0xFFFF } else { 200 }),
        other => TypeInfo::fixed(other),
    };

    let mut cursor = Bytes::copy_from_slice(data);
    // Decoding must never read past declared lengths or panic.
    let _ = decode_value(&mut cursor, &info);
});
