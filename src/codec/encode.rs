//! MQTT Packet Encoder

use bytes::{BufMut, BytesMut};

use super::{write_string, write_variable_int};
use crate::protocol::{
    ConnAck, Connect, EncodeError, Packet, PubAck, Publish, QoS, SubAck, Subscribe,
};

/// Encode a packet to the buffer
pub fn encode(packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(p) => encode_connect(p, buf),
        Packet::ConnAck(p) => encode_connack(p, buf),
        Packet::Publish(p) => encode_publish(p, buf),
        Packet::PubAck(p) => encode_puback(p, buf),
        Packet::Subscribe(p) => encode_subscribe(p, buf),
        Packet::SubAck(p) => encode_suback(p, buf),
        Packet::PingReq => {
            buf.put_u8(0xC0);
            buf.put_u8(0x00);
            Ok(())
        }
        Packet::PingResp => {
            buf.put_u8(0xD0);
            buf.put_u8(0x00);
            Ok(())
        }
        Packet::Disconnect => {
            buf.put_u8(0xE0);
            buf.put_u8(0x00);
            Ok(())
        }
    }
}

fn encode_connect(packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
    // Protocol name "MQTT" (6) + level (1) + connect flags (1) + keep alive (2)
    let mut remaining_length = 10;
    remaining_length += 2 + packet.client_id.len();

    buf.put_u8(0x10); // CONNECT type + flags (0001 0000)
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, "MQTT")?;
    buf.put_u8(0x04); // protocol level 4 = v3.1.1

    let mut connect_flags: u8 = 0;
    if packet.clean_session {
        connect_flags |= 0x02;
    }
    buf.put_u8(connect_flags);

    buf.put_u16(packet.keep_alive);
    write_string(buf, &packet.client_id)?;

    Ok(())
}

fn encode_connack(packet: &ConnAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    buf.put_u8(0x20); // CONNACK type + flags (0010 0000)
    buf.put_u8(0x02); // remaining length
    buf.put_u8(if packet.session_present { 0x01 } else { 0x00 });
    buf.put_u8(packet.return_code as u8);
    Ok(())
}

fn encode_publish(packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let mut remaining_length = 2 + packet.topic.len();
    if packet.qos != QoS::AtMostOnce {
        remaining_length += 2; // packet identifier
    }
    remaining_length += packet.payload.len();

    let mut first_byte: u8 = 0x30; // PUBLISH type (0011)
    if packet.dup {
        first_byte |= 0x08;
    }
    first_byte |= (packet.qos as u8) << 1;
    if packet.retain {
        first_byte |= 0x01;
    }
    buf.put_u8(first_byte);
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, &packet.topic)?;

    // Packet identifier (only for QoS > 0)
    if let Some(packet_id) = packet.packet_id {
        buf.put_u16(packet_id);
    }

    buf.put_slice(&packet.payload);

    Ok(())
}

fn encode_puback(packet: &PubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    buf.put_u8(0x40); // PUBACK type + flags (0100 0000)
    buf.put_u8(0x02); // remaining length
    buf.put_u16(packet.packet_id);
    Ok(())
}

fn encode_subscribe(packet: &Subscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
    // Packet identifier (2) + filter (2 + len) + requested QoS (1)
    let remaining_length = 2 + 2 + packet.filter.len() + 1;

    buf.put_u8(0x82); // SUBSCRIBE type + mandatory flags (1000 0010)
    write_variable_int(buf, remaining_length as u32)?;

    buf.put_u16(packet.packet_id);
    write_string(buf, &packet.filter)?;
    buf.put_u8(packet.qos as u8);

    Ok(())
}

fn encode_suback(packet: &SubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let remaining_length = 2 + packet.return_codes.len();

    buf.put_u8(0x90); // SUBACK type + flags (1001 0000)
    write_variable_int(buf, remaining_length as u32)?;

    buf.put_u16(packet.packet_id);
    for code in &packet.return_codes {
        buf.put_u8(*code as u8);
    }

    Ok(())
}
