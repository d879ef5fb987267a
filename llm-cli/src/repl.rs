//! Line-oriented chat loop

use anyhow::Result;
use llm_client::{Client, Message, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Prompt(&'a str),
    Clear,
    History,
    Quit,
    Help,
    Empty,
    Unknown(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Empty;
    }
    match line.strip_prefix('/') {
        None => Line::Prompt(line),
        Some("clear") => Line::Clear,
        Some("history") => Line::History,
        Some("quit" | "exit") => Line::Quit,
        Some("help") => Line::Help,
        Some(_) => Line::Unknown(line),
    }
}

async fn ask(client: &Client, prompt: &str, shots: Option<usize>, system: Option<&str>) -> Response {
    match (shots, system) {
        (Some(shots), None) => client.multi_shot_generate(prompt, shots).await,
        (shots, system) => {
            let mut messages: Vec<Message> = system.into_iter().map(Message::system).collect();
            messages.push(Message::user(prompt));
            let mut request = Request::messages(messages);
            if let Some(shots) = shots {
                request = request.with_history(Some(shots));
            }
            client.send(request).await
        }
    }
}

fn print_history(client: &Client) {
    if client.history_is_empty() {
        println!("(no history)");
        return;
    }
    for (i, interaction) in client.get_history(None).iter().enumerate() {
        let [user, assistant] = interaction.to_messages();
        println!(
            "{:>3}. [{}] {}",
            i + 1,
            interaction.timestamp().format("%H:%M:%S"),
            user.content
        );
        println!("     -> {}", assistant.content);
    }
}

/// Read prompts from stdin until EOF or `/quit`
pub async fn run(client: &Client, shots: Option<usize>, system: Option<&str>, debug: bool) -> Result<()> {
    println!(
        "Chatting with {}/{}. /help for commands, /quit to exit.",
        client.provider_name(),
        client.model_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_line(&line) {
            Line::Empty => continue,
            Line::Quit => break,
            Line::Help => println!("/clear  forget history\n/history  show history\n/quit  exit"),
            Line::Clear => {
                client.clear_history();
                println!("History cleared.");
            }
            Line::History => print_history(client),
            Line::Unknown(command) => println!("Unknown command: {}", command),
            Line::Prompt(prompt) => {
                let response = ask(client, prompt, shots, system).await;
                match response.error() {
                    Some(error) => eprintln!("[error] {}", error),
                    None => println!("{}", response.content()),
                }
                if debug {
                    if let Some(usage) = response.usage() {
                        eprintln!(
                            "Tokens: {} in, {} out",
                            usage.input_tokens, usage.output_tokens
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
