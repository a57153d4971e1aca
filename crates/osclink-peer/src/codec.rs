//! Wire codec adapter over `rosc`

use osclink_core::{Arg, Bundle, Message, Packet, TimeTag};
use rosc::{OscArray, OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::error::{PeerError, Result};

/// Encode a packet into OSC bytes
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    rosc::encoder::encode(&to_osc(packet))
        .map_err(|e| PeerError::Encode(format!("OSC encode error: {:?}", e)))
}

/// Decode one OSC packet (a datagram or a de-framed stream packet)
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    let (_, packet) = rosc::decoder::decode_udp(bytes)
        .map_err(|e| PeerError::Decode(format!("OSC decode error: {:?}", e)))?;
    from_osc(packet)
}

pub fn to_osc(packet: &Packet) -> OscPacket {
    match packet {
        Packet::Message(msg) => OscPacket::Message(OscMessage {
            addr: msg.address.clone(),
            args: msg.args.iter().map(arg_to_osc).collect(),
        }),
        Packet::Bundle(bundle) => OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: bundle.timetag.seconds(),
                fractional: bundle.timetag.fraction(),
            },
            content: bundle.elements.iter().map(to_osc).collect(),
        }),
    }
}

pub fn from_osc(packet: OscPacket) -> Result<Packet> {
    match packet {
        OscPacket::Message(msg) => {
            let args = msg
                .args
                .into_iter()
                .map(osc_to_arg)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| PeerError::Decode(format!("{} in message to {}", e, msg.addr)))?;
            Ok(Packet::Message(Message::with_args(msg.addr, args)))
        }
        OscPacket::Bundle(bundle) => {
            let elements = bundle
                .content
                .into_iter()
                .map(from_osc)
                .collect::<Result<Vec<_>>>()?;
            let timetag = TimeTag::new(bundle.timetag.seconds, bundle.timetag.fractional);
            Ok(Packet::Bundle(Bundle::new(timetag, elements)))
        }
    }
}

fn arg_to_osc(arg: &Arg) -> OscType {
    match arg {
        Arg::Int(i) => OscType::Int(*i),
        Arg::Float(f) => OscType::Float(*f),
        Arg::String(s) => OscType::String(s.clone()),
        Arg::True => OscType::Bool(true),
        Arg::False => OscType::Bool(false),
        Arg::Blob(b) => OscType::Blob(b.clone()),
        Arg::TimeTag(t) => OscType::Time(OscTime {
            seconds: t.seconds(),
            fractional: t.fraction(),
        }),
        Arg::Double(d) => OscType::Double(*d),
        Arg::Char(c) => OscType::Char(*c),
        Arg::Array(items) => OscType::Array(OscArray {
            content: items.iter().map(arg_to_osc).collect(),
        }),
    }
}

fn osc_to_arg(osc: OscType) -> Result<Arg> {
    Ok(match osc {
        OscType::Int(i) => Arg::Int(i),
        OscType::Float(f) => Arg::Float(f),
        OscType::String(s) => Arg::String(s),
        OscType::Bool(true) => Arg::True,
        OscType::Bool(false) => Arg::False,
        OscType::Blob(b) => Arg::Blob(b),
        OscType::Time(t) => Arg::TimeTag(TimeTag::new(t.seconds, t.fractional)),
        OscType::Double(d) => Arg::Double(d),
        OscType::Char(c) => Arg::Char(c),
        OscType::Array(array) => Arg::Array(
            array
                .content
                .into_iter()
                .map(osc_to_arg)
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            let unsupported = osclink_core::Error::UnsupportedArg(format!("{:?}", other));
            return Err(PeerError::Decode(unsupported.to_string()));
        }
    })
}
