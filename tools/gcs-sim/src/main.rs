// =============================================================================
// AEGIS GCS simulator / attack generator
// =============================================================================
// Emits MAVLink v2 UDP datagrams at the gateway's ingress port, either as a
// well-behaved ground control station (`--pattern normal`) or as one of the
// attack patterns a hostile actor on the same network could attempt
// (GPS spoofing, waypoint injection, command injection, DoS flooding,
// in-flight disarm, out-of-bounds parameters, and nonce replay). One-way:
// UDP gives no synchronous accept/reject signal back to the sender, so
// (unlike an HTTP load test) this tool reports what it sent, not what the
// gateway decided — pair it with `aegis-gateway audit summary` on the
// gateway side to see the other half.
// =============================================================================

use aegis_gateway::mavlink::{self, encode_command_long, encode_frame};
use clap::{Parser, ValueEnum};
use rand::Rng;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Well-known MAV_CMD ids (public MAVLink common dialect), not re-exposed by
// the gateway's codec since only `mav_cmd_takeoff`/`mav_cmd_rtl` are needed
// on its own egress path.
const MAV_CMD_COMPONENT_ARM_DISARM: u16 = 400;
const MAV_CMD_DO_SET_MODE: u16 = 176;
const MAV_CMD_NAV_LAND: u16 = 21;

const MSGID_HEARTBEAT: u32 = 0;
const MSGID_SET_MODE: u32 = 11;
const MSGID_MISSION_ITEM: u32 = 39;
const MSGID_COMMAND_INT: u32 = 75;
const MSGID_GPS_RAW_INT: u32 = 24;
const MSGID_MANUAL_CONTROL: u32 = 69;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Pattern {
    /// Well-formed navigation + heartbeat traffic from the trusted GCS address.
    Normal,
    /// Fake GPS_RAW_INT fixes, as if the aircraft's own position had moved.
    GpsSpoof,
    /// Unsolicited MISSION_ITEM waypoints mid-mission.
    WaypointInject,
    /// Dangerous COMMAND_LONG/SET_MODE traffic (RTL, DISARM, mode hijack).
    CommandInject,
    /// Rapid HEARTBEAT burst meant to trip the flood detector.
    DosFlood,
    /// Disarm command sent while the simulated vehicle is airborne.
    DisarmInFlight,
    /// Navigation command with an out-of-bounds altitude parameter.
    ExtremeAltitude,
    /// The exact same frame sent twice, to exercise the replay detector.
    Replay,
    /// Runs each pattern above once, in sequence.
    All,
}

#[derive(Parser)]
#[command(name = "aegis-gcs-sim")]
#[command(about = "Traffic simulator for the AEGIS gateway (normal + attacker patterns)")]
struct Args {
    /// Gateway ingress address.
    #[arg(long, default_value = "127.0.0.1")]
    target: String,

    /// Gateway ingress port.
    #[arg(long, default_value_t = 14560)]
    port: u16,

    /// Traffic pattern to emit.
    #[arg(long, value_enum, default_value_t = Pattern::Normal)]
    pattern: Pattern,

    /// Messages per second (only consulted by patterns that send more than
    /// a handful of frames: `normal` and `dos-flood`).
    #[arg(long, default_value_t = 5)]
    rate: u32,

    /// Duration in seconds (only consulted by `normal` and `dos-flood`).
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// MAVLink source system id to stamp on outgoing frames.
    #[arg(long, default_value_t = 255)]
    sysid: u8,

    /// MAVLink source component id to stamp on outgoing frames.
    #[arg(long, default_value_t = 190)]
    compid: u8,
}

struct Counters {
    sent: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self { sent: AtomicU64::new(0) }
    }
}

fn f32_payload(values: &[f32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(values.len() * 4);
    for v in values {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    payload
}

/// HEARTBEAT carries no fields this codec inspects; any fixed-length filler
/// payload round-trips through the CRC unchanged.
fn heartbeat_frame(seq: u8, sysid: u8, compid: u8) -> Vec<u8> {
    encode_frame(seq, sysid, compid, MSGID_HEARTBEAT, &[0u8; 9])
}

fn gps_raw_int_frame(seq: u8, sysid: u8, compid: u8, lat: f64, lon: f64, alt_m: f64) -> Vec<u8> {
    let mut payload = vec![0u8; 30];
    payload[8..12].copy_from_slice(&((lat * 1e7) as i32).to_le_bytes());
    payload[12..16].copy_from_slice(&((lon * 1e7) as i32).to_le_bytes());
    payload[16..20].copy_from_slice(&((alt_m * 1000.0) as i32).to_le_bytes());
    payload[28] = 3; // fix_type: 3D fix, looks legitimate
    payload[29] = 12; // satellites_visible
    encode_frame(seq, sysid, compid, MSGID_GPS_RAW_INT, &payload)
}

fn mission_item_frame(seq: u8, sysid: u8, compid: u8, wp_seq: u16, lat: f64, lon: f64, alt_m: f32) -> Vec<u8> {
    let mut payload = f32_payload(&[0.0, 5.0, 0.0, 0.0, lat as f32, lon as f32, alt_m]);
    payload.extend_from_slice(&wp_seq.to_le_bytes());
    payload.extend_from_slice(&16u16.to_le_bytes()); // MAV_CMD_NAV_WAYPOINT
    payload.push(1); // target_system
    payload.push(1); // target_component
    payload.push(0); // frame
    payload.push(0); // current
    payload.push(1); // autocontinue
    encode_frame(seq, sysid, compid, MSGID_MISSION_ITEM, &payload)
}

fn set_mode_frame(seq: u8, sysid: u8, compid: u8, custom_mode: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&custom_mode.to_le_bytes());
    payload.push(1); // target_system
    payload.push(1); // base_mode
    encode_frame(seq, sysid, compid, MSGID_SET_MODE, &payload)
}

/// COMMAND_INT frame carrying altitude/lat/lon in the named offsets
/// `mavlink::decode_payload` and `payload_field_offset` agree on.
fn command_int_frame(seq: u8, sysid: u8, compid: u8, command: u16, lat: f64, lon: f64, alt_m: f32) -> Vec<u8> {
    let mut payload = vec![0u8; 30];
    payload[16..18].copy_from_slice(&command.to_le_bytes());
    payload[18..22].copy_from_slice(&((lat * 1e7) as i32).to_le_bytes());
    payload[22..26].copy_from_slice(&((lon * 1e7) as i32).to_le_bytes());
    payload[26..30].copy_from_slice(&alt_m.to_le_bytes());
    encode_frame(seq, sysid, compid, MSGID_COMMAND_INT, &payload)
}

fn manual_control_frame(seq: u8, sysid: u8, compid: u8, x: i16, y: i16, z: i16, r: i16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    for v in [x, y, z, r] {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    encode_frame(seq, sysid, compid, MSGID_MANUAL_CONTROL, &payload)
}

fn send(socket: &UdpSocket, target: &str, port: u16, frame: &[u8], counters: &Counters, label: &str) {
    match socket.send_to(frame, (target, port)) {
        Ok(n) => {
            counters.sent.fetch_add(1, Ordering::Relaxed);
            println!("  [{label}] sent {n} bytes");
        }
        Err(e) => eprintln!("  [{label}] send failed: {e}"),
    }
}

fn run_normal(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== Normal GCS traffic ===");
    let mut rng = rand::thread_rng();
    let interval = Duration::from_micros(1_000_000 / args.rate.max(1) as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut seq: u8 = 0;

    while Instant::now() < deadline {
        let frame = if seq % 5 == 0 {
            heartbeat_frame(seq, args.sysid, args.compid)
        } else {
            let lat = 47.640420 + rng.gen_range(-0.0005..0.0005);
            let lon = -122.140300 + rng.gen_range(-0.0005..0.0005);
            command_int_frame(seq, args.sysid, args.compid, 16 /* NAV_WAYPOINT */, lat, lon, 30.0)
        };
        send(socket, &args.target, args.port, &frame, counters, "normal");
        seq = seq.wrapping_add(1);
        std::thread::sleep(interval);
    }
}

fn run_gps_spoof(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== GPS spoofing ===");
    let frame = gps_raw_int_frame(0, args.sysid, args.compid, 37.7749, -122.4194, 1000.0);
    send(socket, &args.target, args.port, &frame, counters, "gps-spoof");
}

fn run_waypoint_inject(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== Waypoint injection ===");
    let frame = mission_item_frame(0, args.sysid, args.compid, 99, 40.7128, -74.0060, 500.0);
    send(socket, &args.target, args.port, &frame, counters, "waypoint-inject");
}

fn run_command_inject(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== Command injection ===");
    let rtl = encode_command_long(0, args.sysid, args.compid, mavlink::mav_cmd_rtl(), [0.0; 7]);
    send(socket, &args.target, args.port, &rtl, counters, "command-inject:rtl");

    let disarm = encode_command_long(1, args.sysid, args.compid, MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7]);
    send(socket, &args.target, args.port, &disarm, counters, "command-inject:disarm");

    let land = encode_command_long(2, args.sysid, args.compid, MAV_CMD_NAV_LAND, [0.0; 7]);
    send(socket, &args.target, args.port, &land, counters, "command-inject:land");

    let hijack = set_mode_frame(3, args.sysid, args.compid, 4); // GUIDED
    send(socket, &args.target, args.port, &hijack, counters, "command-inject:mode-hijack");
}

fn run_dos_flood(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== DoS flood ({} msgs/sec for {}s) ===", args.rate, args.duration);
    let interval = Duration::from_micros(1_000_000 / args.rate.max(1) as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut seq: u8 = 0;
    let start = Instant::now();

    while Instant::now() < deadline {
        let frame = heartbeat_frame(seq, args.sysid, args.compid);
        match socket.send_to(&frame, (args.target.as_str(), args.port)) {
            Ok(_) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => eprintln!("  flood send failed: {e}"),
        }
        seq = seq.wrapping_add(1);
        if seq % 50 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!("  flooding... {sent} msgs sent ({:.1} msgs/sec)", sent as f64 / elapsed.max(0.001));
        }
        std::thread::sleep(interval);
    }
}

fn run_disarm_in_flight(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== Disarm in flight ===");
    // param1=0 means disarm; the vehicle-side context (armed, airborne) is
    // whatever the gateway's VehicleState currently holds from telemetry.
    let frame = encode_command_long(0, args.sysid, args.compid, MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7]);
    send(socket, &args.target, args.port, &frame, counters, "disarm-in-flight");
}

fn run_extreme_altitude(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== Extreme altitude parameter ===");
    let frame = command_int_frame(0, args.sysid, args.compid, 16 /* NAV_WAYPOINT */, 47.640420, -122.140300, 500.0);
    send(socket, &args.target, args.port, &frame, counters, "extreme-altitude");
}

fn run_replay(socket: &UdpSocket, args: &Args, counters: &Counters) {
    println!("=== Replay ===");
    let frame = command_int_frame(7, args.sysid, args.compid, 16, 47.640420, -122.140300, 30.0);
    send(socket, &args.target, args.port, &frame, counters, "replay:first");
    std::thread::sleep(Duration::from_secs(1));
    send(socket, &args.target, args.port, &frame, counters, "replay:second (should be rejected)");
}

fn main() {
    let args = Args::parse();
    let socket = UdpSocket::bind("0.0.0.0:0").expect("failed to bind ephemeral UDP socket");
    socket.connect((args.target.as_str(), args.port)).ok();

    println!("Target: {}:{}", args.target, args.port);
    println!("Pattern: {:?}\n", args.pattern);

    let counters = Arc::new(Counters::new());
    let start = Instant::now();

    match args.pattern {
        Pattern::Normal => run_normal(&socket, &args, &counters),
        Pattern::GpsSpoof => run_gps_spoof(&socket, &args, &counters),
        Pattern::WaypointInject => run_waypoint_inject(&socket, &args, &counters),
        Pattern::CommandInject => run_command_inject(&socket, &args, &counters),
        Pattern::DosFlood => run_dos_flood(&socket, &args, &counters),
        Pattern::DisarmInFlight => run_disarm_in_flight(&socket, &args, &counters),
        Pattern::ExtremeAltitude => run_extreme_altitude(&socket, &args, &counters),
        Pattern::Replay => run_replay(&socket, &args, &counters),
        Pattern::All => {
            run_normal(&socket, &Args { duration: 2, ..clone_args(&args) }, &counters);
            run_gps_spoof(&socket, &args, &counters);
            run_waypoint_inject(&socket, &args, &counters);
            run_command_inject(&socket, &args, &counters);
            run_disarm_in_flight(&socket, &args, &counters);
            run_extreme_altitude(&socket, &args, &counters);
            run_replay(&socket, &args, &counters);
            run_dos_flood(&socket, &Args { duration: 2, rate: 60, ..clone_args(&args) }, &counters);
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    println!("\n=== Results ===");
    println!("Duration:   {:.2}s", elapsed.as_secs_f64());
    println!("Total sent: {sent}");
}

fn clone_args(args: &Args) -> Args {
    Args {
        target: args.target.clone(),
        port: args.port,
        pattern: args.pattern,
        rate: args.rate,
        duration: args.duration,
        sysid: args.sysid,
        compid: args.compid,
    }
}
