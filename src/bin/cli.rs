use clap::{App, Arg, ArgMatches, SubCommand};
use seine::{Channel, ChannelConfig, OpStatus, Result, Scope, SeineError};
use std::time::Duration;

fn main() {
    env_logger::init();

    let matches = App::new("seine-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Seine Shared Memory Queue CLI Tool")
        .subcommand(
            SubCommand::with_name("serve")
                .about("Create an inbound channel and print incoming messages")
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Channel name")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("capacity")
                        .short("c")
                        .long("capacity")
                        .value_name("BYTES")
                        .help("Region capacity in bytes")
                        .default_value("1048576")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("global")
                        .long("global")
                        .help("Use the global namespace"),
                ),
        )
        .subcommand(
            SubCommand::with_name("send")
                .about("Open an outbound channel and enqueue one message")
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Channel name")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("message")
                        .short("m")
                        .long("message")
                        .value_name("TEXT")
                        .help("Message payload")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("global")
                        .long("global")
                        .help("Use the global namespace"),
                ),
        )
        .subcommand(
            SubCommand::with_name("stat")
                .about("Print the state of an existing channel")
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Channel name")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("global")
                        .long("global")
                        .help("Use the global namespace"),
                ),
        )
        .subcommand(
            SubCommand::with_name("remove")
                .about("Remove every named object backing a channel")
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Channel name")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("global")
                        .long("global")
                        .help("Use the global namespace"),
                ),
        )
        .get_matches();

    if let Err(err) = run(&matches) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn scope_of(matches: &ArgMatches) -> Scope {
    if matches.is_present("global") {
        Scope::Global
    } else {
        Scope::Local
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    if let Some(m) = matches.subcommand_matches("serve") {
        let name = m.value_of("name").unwrap();
        let capacity: u64 = m
            .value_of("capacity")
            .unwrap()
            .parse()
            .map_err(|_| SeineError::invalid_parameter("capacity", "not a number"))?;
        return serve(name, capacity, scope_of(m));
    }

    if let Some(m) = matches.subcommand_matches("send") {
        let name = m.value_of("name").unwrap();
        let message = m.value_of("message").unwrap();
        let channel = Channel::open_outbound(name, scope_of(m))?;
        let result = channel.send(message.as_bytes(), Some(Duration::from_secs(5)), None)?;
        println!("status: {:?}", result.status);
        if let Some(state) = result.state {
            println!(
                "queued: {} messages, {} of {} bytes used",
                state.active_messages, state.total_space, state.capacity
            );
        }
        return Ok(());
    }

    if let Some(m) = matches.subcommand_matches("stat") {
        let name = m.value_of("name").unwrap();
        let channel = Channel::open_inbound(name, scope_of(m))?;
        let result = channel.state(Some(Duration::from_secs(5)), None)?;
        match result.state {
            Some(state) => println!(
                "channel '{}': {} messages, {} of {} bytes used",
                name, state.active_messages, state.total_space, state.capacity
            ),
            None => println!("channel '{}': {:?}", name, result.status),
        }
        return Ok(());
    }

    if let Some(m) = matches.subcommand_matches("remove") {
        let name = m.value_of("name").unwrap();
        Channel::remove(name, scope_of(m))?;
        println!("removed channel '{}'", name);
        return Ok(());
    }

    eprintln!("no subcommand given; try --help");
    Ok(())
}

fn serve(name: &str, capacity: u64, scope: Scope) -> Result<()> {
    let config = ChannelConfig::new(name, capacity).with_scope(scope);
    let channel = Channel::create_inbound(config)?;
    println!("serving '{}' ({} bytes); waiting for messages", name, capacity);

    loop {
        match channel.wait_has_messages(Some(Duration::from_secs(1)), None)? {
            OpStatus::Completed => {}
            _ => continue,
        }
        let (result, payload) = channel.receive(Some(Duration::from_secs(1)), None)?;
        match result.status {
            OpStatus::Completed => {
                println!("[{} bytes] {}", payload.len(), String::from_utf8_lossy(&payload));
            }
            OpStatus::QueueIsEmpty => {}
            other => eprintln!("read failed: {:?}", other),
        }
    }
}
