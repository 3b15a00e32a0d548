use super::{DepthLevel, FrameKind, MarketDepth, Ohlc, Tick, TickMode};
use crate::price::Price;
use std::io::Read;
use tracing::warn;

/// Classify and decode one websocket message.
///
/// Determinism: this function reads nothing but `payload` — no wall-clock,
/// no randomness — so the same bytes always yield the same [`FrameKind`].
pub fn decode_frame(payload: &[u8]) -> FrameKind {
    if payload.len() == 1 && payload[0] == 0x00 {
        return FrameKind::Heartbeat;
    }

    if payload.first() == Some(&b'{') {
        if let Ok(text) = std::str::from_utf8(payload) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                return FrameKind::TextControl(value);
            }
        }
        // Falls through to binary decode below if it wasn't valid JSON after all.
    }

    if payload.len() >= 2 && payload[0] == 0x78 && matches!(payload[1], 0x9C | 0x01 | 0xDA) {
        return match inflate_zlib(payload) {
            Ok(inflated) => FrameKind::Data(decode_binary(&inflated)),
            Err(e) => {
                warn!(error = %e, "zlib decompression failed; discarding frame");
                FrameKind::Unknown
            }
        };
    }

    if payload.is_empty() {
        return FrameKind::Data(Vec::new());
    }

    FrameKind::Data(decode_binary(payload))
}

fn inflate_zlib(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(payload);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Parse the `u16 n` + repeated `(u16 len, len bytes)` packet layout.
fn decode_binary(payload: &[u8]) -> Vec<Tick> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    let Some(n_packets) = read_u16_be(payload, &mut offset) else {
        return out;
    };

    for _ in 0..n_packets {
        let Some(packet_len) = read_u16_be(payload, &mut offset) else {
            break;
        };
        let packet_len = packet_len as usize;
        if offset + packet_len > payload.len() {
            break;
        }
        let packet = &payload[offset..offset + packet_len];
        offset += packet_len;

        if let Some(tick) = decode_packet(packet) {
            out.push(tick);
        }
    }

    out
}

fn decode_packet(packet: &[u8]) -> Option<Tick> {
    if packet.len() < 8 {
        return None;
    }

    let mut offset = 0usize;
    let token = read_u32_be(packet, &mut offset)?;
    let last_price = Price::from_wire(read_i32_be(packet, &mut offset)?);

    match packet.len() {
        8 => Some(Tick::ltp(token, last_price)),

        28 => {
            let high = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let low = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let open = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let close = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let change = Price::from_wire(read_i32_be(packet, &mut offset)?);

            let mut tick = Tick::ltp(token, last_price);
            tick.mode = TickMode::IndexQuote;
            tick.ohlc = Some(Ohlc { open, high, low, close });
            tick.change = Some(change);
            Some(tick)
        }

        len if len >= 44 => {
            let last_traded_qty = read_u32_be(packet, &mut offset)?;
            let avg_traded_price = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let volume_traded = read_u32_be(packet, &mut offset)?;
            let total_buy_qty = read_u32_be(packet, &mut offset)?;
            let total_sell_qty = read_u32_be(packet, &mut offset)?;
            let open = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let high = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let low = Price::from_wire(read_i32_be(packet, &mut offset)?);
            let close = Price::from_wire(read_i32_be(packet, &mut offset)?);

            let mut tick = Tick::ltp(token, last_price);
            tick.mode = TickMode::Quote;
            tick.last_traded_qty = Some(last_traded_qty);
            tick.avg_traded_price = Some(avg_traded_price);
            tick.volume_traded = Some(volume_traded);
            tick.total_buy_qty = Some(total_buy_qty);
            tick.total_sell_qty = Some(total_sell_qty);
            tick.ohlc = Some(Ohlc { open, high, low, close });
            tick.change = Some(last_price.sub(close));

            if len < 184 {
                return Some(tick);
            }

            let last_trade_time = read_u32_be(packet, &mut offset)?;
            let oi = read_u32_be(packet, &mut offset)?;
            let oi_day_high = read_u32_be(packet, &mut offset)?;
            let oi_day_low = read_u32_be(packet, &mut offset)?;
            let exchange_timestamp = read_u32_be(packet, &mut offset)?;

            let buy = read_depth_levels(packet, &mut offset)?;
            let sell = read_depth_levels(packet, &mut offset)?;

            tick.mode = TickMode::Full;
            tick.last_trade_time = Some(last_trade_time);
            tick.oi = Some(oi);
            tick.oi_day_high = Some(oi_day_high);
            tick.oi_day_low = Some(oi_day_low);
            tick.exchange_timestamp = Some(exchange_timestamp);
            tick.depth = Some(MarketDepth { buy, sell });

            Some(tick)
        }

        _ => None,
    }
}

fn read_depth_levels(packet: &[u8], offset: &mut usize) -> Option<[DepthLevel; 5]> {
    let mut levels = [DepthLevel::default(); 5];
    for level in levels.iter_mut() {
        let quantity = read_u32_be(packet, offset)?;
        let price = Price::from_wire(read_i32_be(packet, offset)?);
        let order_count = read_u16_be(packet, offset)?;
        let _reserved = read_u16_be(packet, offset)?;
        *level = DepthLevel { quantity, price, order_count };
    }
    Some(levels)
}

fn read_u16_be(buf: &[u8], offset: &mut usize) -> Option<u16> {
    if *offset + 2 > buf.len() {
        return None;
    }
    let v = u16::from_be_bytes([buf[*offset], buf[*offset + 1]]);
    *offset += 2;
    Some(v)
}

fn read_u32_be(buf: &[u8], offset: &mut usize) -> Option<u32> {
    if *offset + 4 > buf.len() {
        return None;
    }
    let v = u32::from_be_bytes([buf[*offset], buf[*offset + 1], buf[*offset + 2], buf[*offset + 3]]);
    *offset += 4;
    Some(v)
}

fn read_i32_be(buf: &[u8], offset: &mut usize) -> Option<i32> {
    read_u32_be(buf, offset).map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be_u16(v: u16) -> [u8; 2] {
        v.to_be_bytes()
    }
    fn be_u32(v: u32) -> [u8; 4] {
        v.to_be_bytes()
    }
    fn be_i32(v: i32) -> [u8; 4] {
        v.to_be_bytes()
    }

    fn wrap_packets(packets: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&be_u16(packets.len() as u16));
        for p in packets {
            buf.extend_from_slice(&be_u16(p.len() as u16));
            buf.extend_from_slice(p);
        }
        buf
    }

    fn ltp_packet(token: u32, price: i32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&be_u32(token));
        p.extend_from_slice(&be_i32(price));
        p
    }

    fn full_packet(token: u32, price: i32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&be_u32(token)); // token
        p.extend_from_slice(&be_i32(price)); // last_price
        p.extend_from_slice(&be_u32(10)); // last_traded_qty
        p.extend_from_slice(&be_i32(price)); // avg_traded_price
        p.extend_from_slice(&be_u32(500_000)); // volume_traded
        p.extend_from_slice(&be_u32(100)); // total_buy_qty
        p.extend_from_slice(&be_u32(200)); // total_sell_qty
        p.extend_from_slice(&be_i32(240_000)); // open
        p.extend_from_slice(&be_i32(255_000)); // high
        p.extend_from_slice(&be_i32(239_000)); // low
        p.extend_from_slice(&be_i32(240_000)); // close
        p.extend_from_slice(&be_u32(1_700_000_000)); // last_trade_time
        p.extend_from_slice(&be_u32(0)); // oi
        p.extend_from_slice(&be_u32(0)); // oi_day_high
        p.extend_from_slice(&be_u32(0)); // oi_day_low
        p.extend_from_slice(&be_u32(1_700_000_001)); // exchange_timestamp
        for i in 0..10u32 {
            p.extend_from_slice(&be_u32(i + 1)); // qty
            p.extend_from_slice(&be_i32(price)); // price
            p.extend_from_slice(&be_u16(1)); // orders
            p.extend_from_slice(&be_u16(0)); // padding
        }
        assert_eq!(p.len(), 184);
        p
    }

    #[test]
    fn heartbeat_is_a_single_zero_byte() {
        assert_eq!(decode_frame(&[0x00]), FrameKind::Heartbeat);
    }

    #[test]
    fn empty_frame_yields_zero_ticks() {
        assert_eq!(decode_frame(&[]), FrameKind::Data(vec![]));
    }

    #[test]
    fn text_control_frame_is_parsed_as_json() {
        let raw = br#"{"type":"error","data":"bad token"}"#;
        match decode_frame(raw) {
            FrameKind::TextControl(v) => assert_eq!(v["type"], "error"),
            other => panic!("expected TextControl, got {other:?}"),
        }
    }

    #[test]
    fn eight_byte_packet_decodes_as_ltp() {
        let frame = wrap_packets(&[ltp_packet(738561, 250_000)]);
        match decode_frame(&frame) {
            FrameKind::Data(ticks) => {
                assert_eq!(ticks.len(), 1);
                assert_eq!(ticks[0].mode, TickMode::Ltp);
                assert_eq!(ticks[0].last_price, Price::from_wire(250_000));
                assert!(ticks[0].volume_traded.is_none());
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn forty_four_byte_packet_decodes_as_quote_with_no_depth() {
        let mut p = Vec::new();
        p.extend_from_slice(&be_u32(1));
        p.extend_from_slice(&be_i32(100_00));
        p.extend_from_slice(&be_u32(1)); // last_traded_qty
        p.extend_from_slice(&be_i32(100_00)); // avg
        p.extend_from_slice(&be_u32(1000)); // volume
        p.extend_from_slice(&be_u32(1)); // buy_qty
        p.extend_from_slice(&be_u32(1)); // sell_qty
        p.extend_from_slice(&be_i32(95_00)); // open
        p.extend_from_slice(&be_i32(101_00)); // high
        p.extend_from_slice(&be_i32(94_00)); // low
        p.extend_from_slice(&be_i32(96_00)); // close
        assert_eq!(p.len(), 44);

        let frame = wrap_packets(&[p]);
        match decode_frame(&frame) {
            FrameKind::Data(ticks) => {
                assert_eq!(ticks.len(), 1);
                assert_eq!(ticks[0].mode, TickMode::Quote);
                assert!(ticks[0].depth.is_none());
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn full_packet_decodes_with_five_plus_five_depth() {
        let frame = wrap_packets(&[full_packet(738561, 250_000)]);
        match decode_frame(&frame) {
            FrameKind::Data(ticks) => {
                assert_eq!(ticks.len(), 1);
                let t = &ticks[0];
                assert_eq!(t.mode, TickMode::Full);
                let depth = t.depth.as_ref().unwrap();
                assert_eq!(depth.buy.len(), 5);
                assert_eq!(depth.sell.len(), 5);
                assert_eq!(depth.buy[0].quantity, 1);
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn truncated_buffer_mid_packet_stops_without_panic() {
        let mut frame = wrap_packets(&[ltp_packet(1, 100), ltp_packet(2, 200)]);
        frame.truncate(frame.len() - 3);
        match decode_frame(&frame) {
            FrameKind::Data(ticks) => assert_eq!(ticks.len(), 1),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let frame = wrap_packets(&[full_packet(738561, 250_000), ltp_packet(99, 1)]);
        assert_eq!(decode_frame(&frame), decode_frame(&frame));
    }

    #[test]
    fn unknown_mode_length_is_skipped_not_fatal() {
        // A 10-byte packet matches none of the documented lengths (8/28/44.../184...)
        // once we account for token+price (8) + 2 extra bytes; treated as >=44? No: 10<44 so None.
        let odd = vec![0u8; 10];
        let frame = wrap_packets(&[odd, ltp_packet(5, 500)]);
        match decode_frame(&frame) {
            FrameKind::Data(ticks) => {
                assert_eq!(ticks.len(), 1);
                assert_eq!(ticks[0].token, 5);
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }
}
