//! Embedded boot files written into every bundle

/// One-line launcher at the bundle root.
pub const MAIN_JS: &str = "require('./server/server.js');\n";

/// The server runner: loads `app.json`, evaluates the server program in
/// load order, and serves the client assets it describes.
pub const SERVER_JS: &str = r#"var fs = require('fs');
var path = require('path');

var bundleRoot = path.resolve(__dirname, '..');
var appJson = JSON.parse(
  fs.readFileSync(path.join(bundleRoot, 'app.json'), 'utf8'));

appJson.load.forEach(function (relPath) {
  require(path.join(bundleRoot, relPath));
});
"#;

/// Shell of the served HTML document. Placeholders are replaced when the
/// bundle is written.
pub const APP_HTML_IN: &str = r#"<!DOCTYPE html>
<html>
<head>
{{stylesheets}}
{{scripts}}
{{head}}
</head>
<body>
{{body}}
</body>
</html>
"#;

/// Dropped at the bundle root so an unpacked bundle explains itself.
pub const README: &str = r#"This directory is a deployable application bundle.

Run the application with:

  node main.js

The server program lives under server/ and app/; client assets are under
static/ and static_cacheable/. app.json describes every file in the
bundle. Regenerate the bundle instead of editing it in place.
"#;

/// Replace `{{key}}` placeholders in a template.
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}
