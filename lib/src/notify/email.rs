/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::sync::Arc;

use base64::Engine;
use futures::future::BoxFuture;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use super::{receiver_config, render_message, Notifier, NotifierEnv};
use crate::{
    alert::{Alert, AlertStatus},
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec},
};

/// Delivers plain-text mail over SMTP, one message per group with all
/// recipients on the envelope.
pub struct EmailNotifier {
    env: Arc<NotifierEnv>,
    host: String,
    port: u16,
    from: String,
    hello: String,
    auth: Option<(String, String)>,
    to: Vec<String>,
}

impl EmailNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Email(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not an email receiver"),
            ));
        };
        let config = receiver_config(receiver, |c| match c {
            ConfigSpec::Email(c) => Some(c),
            _ => None,
        })?;
        let auth = match (&config.auth_username, &config.auth_password) {
            (Some(user), Some(password)) => Some((user.clone(), password.resolve()?)),
            _ => None,
        };
        Ok(Self {
            env,
            host: config.smart_host.host.clone(),
            port: config.smart_host.port,
            from: config.from.clone(),
            hello: config
                .hello
                .clone()
                .unwrap_or_else(|| String::from("localhost")),
            auth,
            to: spec.to.clone(),
        })
    }

    fn message(&self, group: &Labels, alerts: &[Alert]) -> String {
        let firing = alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Firing)
            .count();
        let name = alerts
            .iter()
            .find_map(|a| a.name())
            .unwrap_or("alerts");
        let subject = format!(
            "[{}:{}] {name}",
            if firing > 0 { "FIRING" } else { "RESOLVED" },
            alerts.len()
        );
        let headers = format!(
            "From: {}\r\nTo: {}\r\nSubject: {subject}\r\nDate: {}\r\n\
             MIME-Version: 1.0\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n",
            self.from,
            self.to.join(", "),
            chrono::Utc::now().to_rfc2822(),
        );
        headers + &dot_stuff(&render_message(group, alerts))
    }

    async fn deliver(&self, message: &str) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let mut session = Session {
            stream: BufReader::new(stream),
        };
        session.expect(220).await?;
        session.command(&format!("EHLO {}", self.hello), 250).await?;
        if let Some((user, password)) = &self.auth {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("\0{user}\0{password}"));
            session.command(&format!("AUTH PLAIN {token}"), 235).await?;
        }
        session
            .command(&format!("MAIL FROM:<{}>", self.from), 250)
            .await?;
        for rcpt in &self.to {
            session.command(&format!("RCPT TO:<{rcpt}>"), 250).await?;
        }
        session.command("DATA", 354).await?;
        session.write(message).await?;
        session.command(".", 250).await?;
        if let Err(e) = session.command("QUIT", 221).await {
            log::debug!("smtp quit failed on {}: {e}", self.host);
        }
        Ok(())
    }
}

/// CRLF line endings, with leading dots doubled.
fn dot_stuff(body: &str) -> String {
    body.lines()
        .map(|line| match line.starts_with('.') {
            true => format!(".{line}\r\n"),
            false => format!("{line}\r\n"),
        })
        .collect()
}

struct Session {
    stream: BufReader<TcpStream>,
}

impl Session {
    async fn write(&mut self, data: &str) -> Result<()> {
        self.stream.get_mut().write_all(data.as_bytes()).await?;
        Ok(())
    }

    async fn command(&mut self, command: &str, code: u16) -> Result<String> {
        self.write(&format!("{command}\r\n")).await?;
        self.expect(code).await
    }

    async fn expect(&mut self, expected: u16) -> Result<String> {
        let (code, text) = self.reply().await?;
        match code == expected {
            true => Ok(text),
            false => Err(Error::Smtp(format!("expected {expected}, got {code} {text}"))),
        }
    }

    /// Read a possibly multi-line reply.
    async fn reply(&mut self) -> Result<(u16, String)> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(Error::Smtp(String::from("connection closed")));
            }
            let line = line.trim_end();
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| Error::Smtp(format!("malformed reply: {line}")))?;
            text.push_str(line.get(4..).unwrap_or_default());
            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok((code, text));
            }
            text.push('\n');
        }
    }
}

impl Notifier for EmailNotifier {
    fn notify<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let message = self.message(group, alerts);
            tokio::time::timeout(self.env.settings.send_timeout, self.deliver(&message))
                .await
                .map_err(|_| Error::Smtp(format!("timed out talking to {}", self.host)))?
        })
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    use super::{dot_stuff, EmailNotifier};
    use crate::{
        alert::Alert,
        config::{Config, ConfigSpec},
        context::ExecContext,
        labels::Labels,
        notify::{Notifier, NotifierEnv},
        receiver::{Receiver, ReceiverSpec},
        settings::NotifySettings,
        tenant::TenantId,
    };

    #[test]
    fn leading_dots_are_doubled() {
        assert_eq!(dot_stuff("a\n.b\n..c"), "a\r\n..b\r\n...c\r\n");
    }

    /// Minimal SMTP server accepting one message and returning the
    /// commands and data it received.
    async fn fake_server(listener: TcpListener) -> (Vec<String>, String) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);
        let mut commands = Vec::new();
        let mut data = String::new();
        write.write_all(b"220 fake ready\r\n").await.unwrap();
        loop {
            let mut line = String::new();
            if read.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            let verb = line.split(' ').next().unwrap_or_default().to_string();
            let reply: &[u8] = match verb.as_str() {
                "EHLO" => b"250-fake\r\n250 AUTH PLAIN\r\n",
                "AUTH" => b"235 authenticated\r\n",
                "MAIL" | "RCPT" => b"250 ok\r\n",
                "DATA" => {
                    write.write_all(b"354 go ahead\r\n").await.unwrap();
                    loop {
                        let mut line = String::new();
                        read.read_line(&mut line).await.unwrap();
                        if line == ".\r\n" {
                            break;
                        }
                        data.push_str(&line);
                    }
                    b"250 queued\r\n"
                }
                "QUIT" => {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    commands.push(line);
                    break;
                }
                _ => b"500 unknown\r\n",
            };
            commands.push(line);
            write.write_all(reply).await.unwrap();
        }
        (commands, data)
    }

    #[tokio::test]
    async fn delivers_over_smtp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener));

        let spec: ReceiverSpec =
            serde_json::from_value(json!({"email": {"to": ["a@example.com", "b@example.com"]}}))
                .unwrap();
        let mut receiver = Receiver::new("mail".into(), TenantId::global(), Labels::new(), spec);
        let config: ConfigSpec = serde_json::from_value(json!({"email": {
            "smartHost": {"host": "127.0.0.1", "port": port},
            "from": "alerts@example.com",
            "authUsername": "user",
            "authPassword": "secret",
        }}))
        .unwrap();
        receiver.set_config(Some(Config::new(
            "mail".into(),
            TenantId::default_config(),
            Labels::new(),
            config,
        )));

        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let env = Arc::new(NotifierEnv::new(client, NotifySettings::default()));
        let notifier = EmailNotifier::new(&receiver, env).unwrap();

        let alert: Alert = serde_json::from_value(json!({
            "labels": {"alertname": "DiskFull", "namespace": "ns1"},
        }))
        .unwrap();
        let ctx = ExecContext::new(1, Duration::from_secs(5));
        notifier
            .notify(&ctx, &Labels::new(), &[alert])
            .await
            .unwrap();

        let (commands, data) = server.await.unwrap();
        assert_eq!(commands[0], "EHLO localhost");
        assert!(commands[1].starts_with("AUTH PLAIN "));
        assert_eq!(commands[2], "MAIL FROM:<alerts@example.com>");
        assert_eq!(commands[3], "RCPT TO:<a@example.com>");
        assert_eq!(commands[4], "RCPT TO:<b@example.com>");
        assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
        assert!(data.contains("Subject: [FIRING:1] DiskFull\r\n"));
        assert!(data.contains("To: a@example.com, b@example.com\r\n"));
    }
}
