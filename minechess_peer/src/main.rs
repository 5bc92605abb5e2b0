// Headless Minechess peer over TCP.
//
// Runs one side of a match from the terminal. The host listens for a single
// guest; the guest dials the host. Commands are read from stdin, one per
// line, and session events are printed as they arrive. Useful for poking at
// the protocol by hand and as a reference embedding of `spawn_peer`.
//
// Usage:
//   peer host --port <PORT> [--password <PASS>] [--room-name <NAME>] [--room <ID>]
//   peer join <ADDR> [--password <PASS>] [--room <ID>]
//
// Stdin commands:
//   start | ready [BID] | mine R C | move UNIT R C | attack UNIT TARGET
//   end [UNIT] | skip | state | leave | quit

use std::io::BufRead;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use minechess_peer::runner::{Command, PeerHandle, spawn_peer};
use minechess_peer::tcp::TcpConnector;
use minechess_peer::{PeerConfig, SessionSettings};
use minechess_protocol::{Coord, Role};
use minechess_sim::{GameAction, GameConfig};

const DEFAULT_ROOM: &str = "minechess-room";

struct Args {
    role: Role,
    port: u16,
    addr: Option<SocketAddr>,
    password: Option<String>,
    room_name: Option<String>,
    room_id: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    let connector = match args.role {
        Role::Host => match TcpListener::bind(("0.0.0.0", args.port)) {
            Ok(listener) => {
                if let Ok(addr) = listener.local_addr() {
                    println!("Hosting on {addr}");
                }
                TcpConnector::listen(listener)
            }
            Err(e) => {
                eprintln!("Failed to listen on port {}: {e}", args.port);
                std::process::exit(1);
            }
        },
        Role::Guest => match args.addr {
            Some(addr) => TcpConnector::dial(addr),
            None => {
                eprintln!("join requires a host address");
                std::process::exit(1);
            }
        },
    };

    let settings = SessionSettings {
        role: args.role,
        room_id: args.room_id,
        peer_id: format!("{:?}-{}", args.role, std::process::id()).to_lowercase(),
        password: args.password,
        room_name: args.room_name,
        allow_dev_tools: false,
    };
    let handle = match spawn_peer(
        settings,
        PeerConfig::default(),
        GameConfig::default(),
        Box::new(connector),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to start session: {e}");
            std::process::exit(1);
        }
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        print_events(&handle);
        match parse_command(&line) {
            Some(Input::Quit) => break,
            Some(Input::State) => match handle.snapshot(Duration::from_secs(1)) {
                Some(state) => println!(
                    "turn {} phase {:?} current {} energy P1={} P2={}",
                    state.turn_count,
                    state.phase,
                    state.current_player,
                    state.players.p1.energy,
                    state.players.p2.energy
                ),
                None => println!("no match"),
            },
            Some(Input::Command(command)) => {
                if !handle.send(command) {
                    break;
                }
            }
            None => println!("?"),
        }
        // Give the session thread a moment so its events print with the command.
        thread::sleep(Duration::from_millis(50));
        print_events(&handle);
    }

    println!("Shutting down...");
    handle.stop();
}

fn print_events(handle: &PeerHandle) {
    while let Ok(event) = handle.events().try_recv() {
        println!("{event:?}");
    }
}

enum Input {
    Command(Command),
    State,
    Quit,
}

fn parse_command(line: &str) -> Option<Input> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let num = |i: usize| words.get(i).and_then(|w| w.parse::<u8>().ok());
    let word = |i: usize| words.get(i).map(|w| (*w).to_owned());
    let command = match words.first().copied()? {
        "quit" | "exit" => return Some(Input::Quit),
        "state" => return Some(Input::State),
        "start" => Command::StartMatch,
        "leave" => Command::LeaveMatch,
        "ready" => Command::Ready {
            bid: words.get(1).and_then(|w| w.parse().ok()),
        },
        "mine" => Command::PlaceSetupMine(Coord::new(num(1)?, num(2)?)),
        "move" => Command::Perform(GameAction::Move {
            unit_id: word(1)?,
            target: Coord::new(num(2)?, num(3)?),
        }),
        "attack" => Command::Perform(GameAction::Attack {
            attacker_id: word(1)?,
            target_id: word(2)?,
        }),
        "end" => Command::Perform(GameAction::EndTurn {
            acted_unit_id: word(1),
        }),
        "skip" => Command::Perform(GameAction::SkipTurn),
        _ => return None,
    };
    Some(Input::Command(command))
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        role: Role::Host,
        port: 7979,
        addr: None,
        password: None,
        room_name: None,
        room_id: DEFAULT_ROOM.to_owned(),
    };
    let mut i = 1;

    match args.get(i).map(String::as_str) {
        Some("host") => parsed.role = Role::Host,
        Some("join") => {
            parsed.role = Role::Guest;
            i += 1;
            parsed.addr = args.get(i).and_then(|s| s.parse().ok()).or_else(|| {
                eprintln!("join requires an address like 127.0.0.1:7979");
                std::process::exit(1);
            });
        }
        Some("--help" | "-h") => {
            print_usage();
            std::process::exit(0);
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }
    i += 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                parsed.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--password" => {
                i += 1;
                parsed.password = args.get(i).cloned().or_else(|| {
                    eprintln!("--password requires a value");
                    std::process::exit(1);
                });
            }
            "--room-name" => {
                i += 1;
                parsed.room_name = args.get(i).cloned().or_else(|| {
                    eprintln!("--room-name requires a value");
                    std::process::exit(1);
                });
            }
            "--room" => {
                i += 1;
                parsed.room_id = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--room requires a value");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_usage() {
    println!("Usage:");
    println!("  peer host --port <PORT> [--password <PASS>] [--room-name <NAME>] [--room <ID>]");
    println!("  peer join <ADDR> [--password <PASS>] [--room <ID>]");
    println!();
    println!("Options:");
    println!("  --port <PORT>         Listen port for host (default: 7979)");
    println!("  --password <PASS>     Host: required password. Guest: password to send");
    println!("  --room-name <NAME>    Display name sent to the guest on accept");
    println!("  --room <ID>           Room id both sides must share (default: {DEFAULT_ROOM})");
    println!("  --help, -h            Show this help");
}
